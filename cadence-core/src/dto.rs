use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRequest {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub birth_year: Option<i32>,
    pub cycle_length_days: i32,
    pub period_length_days: i32,
    #[serde(default)]
    pub last_period_start: Option<String>,
    pub weekly_distance_km: f64,
}

/// Server view of the runner profile. Notification preferences live only on
/// the device and are therefore absent here.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResponse {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub birth_year: Option<i32>,
    pub cycle_length_days: i32,
    pub period_length_days: i32,
    #[serde(default)]
    pub last_period_start: Option<String>,
    pub weekly_distance_km: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RaceRequest {
    pub id: String,
    pub name: String,
    pub race_date: String,
    pub distance_km: f64,
    #[serde(default)]
    pub goal_time_secs: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RaceResponse {
    pub id: String,
    pub name: String,
    pub race_date: String,
    pub distance_km: f64,
    #[serde(default)]
    pub goal_time_secs: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanResponse {
    pub id: String,
    #[serde(default)]
    pub race_id: Option<String>,
    pub start_date: String,
    pub end_date: String,
    #[serde(default)]
    pub sessions: Vec<SessionResponse>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub id: String,
    pub session_date: String,
    pub session_type: String,
    #[serde(default)]
    pub distance_km: Option<f64>,
    #[serde(default)]
    pub duration_minutes: Option<i32>,
    #[serde(default)]
    pub completed: bool,
}
