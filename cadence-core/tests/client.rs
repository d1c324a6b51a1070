use cadence_core::{ApiResult, CadenceClient, ProfileRequest, RaceRequest};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn get_profile_includes_bearer_header() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/profile"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "p1",
            "displayName": "Ada",
            "birthYear": 1990,
            "cycleLengthDays": 28,
            "periodLengthDays": 5,
            "lastPeriodStart": "2024-03-01",
            "weeklyDistanceKm": 32.5
        })))
        .mount(&server)
        .await;

    let client = CadenceClient::with_base_url(&server.uri(), "test-token").unwrap();
    let profile = client.get_profile().await.unwrap();

    assert_eq!(profile.id, "p1");
    assert_eq!(profile.cycle_length_days, 28);
    assert_eq!(profile.last_period_start.as_deref(), Some("2024-03-01"));
}

#[tokio::test]
async fn save_profile_puts_json_body() {
    let server = MockServer::start().await;
    let request = ProfileRequest {
        id: "p1".into(),
        display_name: "Ada".into(),
        birth_year: None,
        cycle_length_days: 30,
        period_length_days: 4,
        last_period_start: None,
        weekly_distance_km: 20.0,
    };

    Mock::given(method("PUT"))
        .and(path("/api/v1/profile"))
        .and(body_json(json!({
            "id": "p1",
            "displayName": "Ada",
            "birthYear": null,
            "cycleLengthDays": 30,
            "periodLengthDays": 4,
            "lastPeriodStart": null,
            "weeklyDistanceKm": 20.0
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "p1",
            "displayName": "Ada",
            "cycleLengthDays": 30,
            "periodLengthDays": 4,
            "weeklyDistanceKm": 20.0
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = CadenceClient::with_base_url(&server.uri(), "test-token").unwrap();
    let saved = client.save_profile(&request).await.unwrap();

    assert_eq!(saved.display_name, "Ada");
    assert_eq!(saved.birth_year, None);
}

#[tokio::test]
async fn create_race_posts_to_races() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/races"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "r1",
            "name": "City 10k",
            "raceDate": "2024-09-15",
            "distanceKm": 10.0,
            "goalTimeSecs": 3000
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = CadenceClient::with_base_url(&server.uri(), "test-token").unwrap();
    let race = client
        .create_race(&RaceRequest {
            id: "r1".into(),
            name: "City 10k".into(),
            race_date: "2024-09-15".into(),
            distance_km: 10.0,
            goal_time_secs: Some(3000),
        })
        .await
        .unwrap();

    assert_eq!(race.goal_time_secs, Some(3000));
}

#[tokio::test]
async fn get_races_returns_list() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/races"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "r1", "name": "A", "raceDate": "2024-05-01", "distanceKm": 5.0},
            {"id": "r2", "name": "B", "raceDate": "2024-06-01", "distanceKm": 21.1}
        ])))
        .mount(&server)
        .await;

    let client = CadenceClient::with_base_url(&server.uri(), "test-token").unwrap();
    let races = client.get_races().await.unwrap();

    assert_eq!(races.len(), 2);
    assert_eq!(races[1].id, "r2");
    assert_eq!(races[0].goal_time_secs, None);
}

#[tokio::test]
async fn get_active_plan_parses_sessions() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/plans/active"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "plan-1",
            "raceId": "r1",
            "startDate": "2024-01-01",
            "endDate": "2024-03-01",
            "sessions": [
                {"id": "s1", "sessionDate": "2024-01-02", "sessionType": "easy", "distanceKm": 6.0},
                {"id": "s2", "sessionDate": "2024-01-09", "sessionType": "tempo", "durationMinutes": 40, "completed": true}
            ]
        })))
        .mount(&server)
        .await;

    let client = CadenceClient::with_base_url(&server.uri(), "test-token").unwrap();
    let plan = client.get_active_plan().await.unwrap();

    assert_eq!(plan.race_id.as_deref(), Some("r1"));
    assert_eq!(plan.sessions.len(), 2);
    assert!(!plan.sessions[0].completed);
    assert_eq!(plan.sessions[1].duration_minutes, Some(40));
}

#[tokio::test]
async fn missing_plan_maps_to_not_found_server_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/plans/active"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no active plan"))
        .mount(&server)
        .await;

    let client = CadenceClient::with_base_url(&server.uri(), "test-token").unwrap();
    let result = ApiResult::from(client.get_active_plan().await);

    assert!(result.is_not_found());
    assert_eq!(
        result.failure_reason().as_deref(),
        Some("server error 404: no active plan")
    );
}

#[tokio::test]
async fn unreachable_server_maps_to_network_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let client =
        CadenceClient::with_base_url(&format!("http://127.0.0.1:{port}"), "test-token").unwrap();
    let result = ApiResult::from(client.get_races().await);

    assert_eq!(result, ApiResult::NetworkError);
}
