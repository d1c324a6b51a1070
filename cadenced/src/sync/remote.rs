use async_trait::async_trait;
use cadence_core::{
    ApiResult, CadenceClient, PlanResponse, ProfileRequest, ProfileResponse, RaceRequest,
    RaceResponse,
};

use super::store::{Race, RunnerProfile};

/// Server surface the executor depends on.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn save_profile(&self, request: &ProfileRequest) -> ApiResult<ProfileResponse>;
    async fn create_race(&self, request: &RaceRequest) -> ApiResult<RaceResponse>;
    async fn get_profile(&self) -> ApiResult<ProfileResponse>;
    async fn get_races(&self) -> ApiResult<Vec<RaceResponse>>;
    async fn get_active_plan(&self) -> ApiResult<PlanResponse>;
}

#[async_trait]
impl RemoteApi for CadenceClient {
    async fn save_profile(&self, request: &ProfileRequest) -> ApiResult<ProfileResponse> {
        CadenceClient::save_profile(self, request).await.into()
    }

    async fn create_race(&self, request: &RaceRequest) -> ApiResult<RaceResponse> {
        CadenceClient::create_race(self, request).await.into()
    }

    async fn get_profile(&self) -> ApiResult<ProfileResponse> {
        CadenceClient::get_profile(self).await.into()
    }

    async fn get_races(&self) -> ApiResult<Vec<RaceResponse>> {
        CadenceClient::get_races(self).await.into()
    }

    async fn get_active_plan(&self) -> ApiResult<PlanResponse> {
        CadenceClient::get_active_plan(self).await.into()
    }
}

pub fn profile_request(profile: &RunnerProfile) -> ProfileRequest {
    ProfileRequest {
        id: profile.id.clone(),
        display_name: profile.display_name.clone(),
        birth_year: profile.birth_year,
        cycle_length_days: profile.cycle_length_days,
        period_length_days: profile.period_length_days,
        last_period_start: profile.last_period_start.clone(),
        weekly_distance_km: profile.weekly_distance_km,
    }
}

pub fn race_request(race: &Race) -> RaceRequest {
    RaceRequest {
        id: race.id.clone(),
        name: race.name.clone(),
        race_date: race.race_date.clone(),
        distance_km: race.distance_km,
        goal_time_secs: race.goal_time_secs,
    }
}
