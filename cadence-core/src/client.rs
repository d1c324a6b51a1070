use reqwest::{Client, StatusCode};
use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::dto::{PlanResponse, ProfileRequest, ProfileResponse, RaceRequest, RaceResponse};

#[derive(Debug, Error)]
pub enum CadenceError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
}

/// Outcome of one remote call as seen by the sync engine.
///
/// Anything that never produced a server response (connection refused,
/// timeout, undecodable body, bad base url) collapses into `NetworkError`.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiResult<T> {
    Success(T),
    ServerError { code: u16, message: String },
    NetworkError,
}

impl<T> ApiResult<T> {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiResult::ServerError { code, .. } if *code == StatusCode::NOT_FOUND.as_u16())
    }

    pub fn failure_reason(&self) -> Option<String> {
        match self {
            ApiResult::Success(_) => None,
            ApiResult::ServerError { code, message } => Some(format!("server error {code}: {message}")),
            ApiResult::NetworkError => Some("network error".to_string()),
        }
    }
}

impl<T> From<Result<T, CadenceError>> for ApiResult<T> {
    fn from(result: Result<T, CadenceError>) -> Self {
        match result {
            Ok(value) => ApiResult::Success(value),
            Err(CadenceError::Api { status, body }) => ApiResult::ServerError {
                code: status.as_u16(),
                message: body,
            },
            Err(CadenceError::Request(_) | CadenceError::Url(_)) => ApiResult::NetworkError,
        }
    }
}

#[derive(Clone)]
pub struct CadenceClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl CadenceClient {
    pub fn with_base_url(base_url: &str, token: impl Into<String>) -> Result<Self, CadenceError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            token: token.into(),
        })
    }

    pub async fn save_profile(
        &self,
        request: &ProfileRequest,
    ) -> Result<ProfileResponse, CadenceError> {
        self.send_json(reqwest::Method::PUT, "/api/v1/profile", request).await
    }

    pub async fn create_race(&self, request: &RaceRequest) -> Result<RaceResponse, CadenceError> {
        self.send_json(reqwest::Method::POST, "/api/v1/races", request).await
    }

    pub async fn get_profile(&self) -> Result<ProfileResponse, CadenceError> {
        self.get("/api/v1/profile").await
    }

    pub async fn get_races(&self) -> Result<Vec<RaceResponse>, CadenceError> {
        self.get("/api/v1/races").await
    }

    pub async fn get_active_plan(&self) -> Result<PlanResponse, CadenceError> {
        self.get("/api/v1/plans/active").await
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, CadenceError> {
        let url = self.endpoint(path)?;
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    async fn send_json<B, T>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: &B,
    ) -> Result<T, CadenceError>
    where
        B: Serialize + ?Sized,
        T: serde::de::DeserializeOwned,
    {
        let url = self.endpoint(path)?;
        let response = self
            .http
            .request(method, url)
            .header("Authorization", self.auth_header_value())
            .json(body)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    fn auth_header_value(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn endpoint(&self, path: &str) -> Result<Url, CadenceError> {
        Ok(self.base_url.join(path)?)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, CadenceError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(CadenceError::Api { status, body })
        }
    }
}
