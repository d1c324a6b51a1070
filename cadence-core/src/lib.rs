mod client;
mod dto;

pub use client::{ApiResult, CadenceClient, CadenceError};
pub use dto::{
    PlanResponse, ProfileRequest, ProfileResponse, RaceRequest, RaceResponse, SessionResponse,
};
