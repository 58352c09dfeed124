//! End-to-end tests for the project and AI endpoints
//!
//! Covers project CRUD, keyframe editing, the interpolated visual state and
//! the style advisor routes.

mod common;

use common::{TestClient, TestServer, TestServerOptions, TEST_TRACK_BEATS, TEST_USER_ID};
use reqwest::StatusCode;
use serde_json::{json, Value};

fn keyframe(time: f64, style: &str, particle_count: u32) -> Value {
    json!({
        "time": time,
        "style": style,
        "settings": {
            "particleCount": particle_count,
            "colorPalette": ["#000000", "#ffffff"],
            "intensity": 1.0,
        }
    })
}

// =============================================================================
// Projects
// =============================================================================

#[tokio::test]
async fn test_create_project_starts_analysis() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client.create_project("Song").await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["project"]["status"], "analyzing");
    assert_eq!(body["project"]["userId"], TEST_USER_ID);

    let id = body["project"]["id"].as_str().unwrap();
    let project = client
        .wait_for_project(id, |p| p["status"] == "ready")
        .await;
    assert_eq!(
        project["audioMetadata"]["beats"].as_array().unwrap().len(),
        TEST_TRACK_BEATS.len()
    );
}

#[tokio::test]
async fn test_create_project_requires_fields() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client
        .create_project_raw(json!({ "userId": "", "name": "Song", "audioPath": "/a.mp3" }))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "userId is required");
}

#[tokio::test]
async fn test_list_and_delete_projects() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    let first = client.create_analyzed_project("First").await;
    client.create_analyzed_project("Second").await;

    let body: Value = client
        .list_projects(TEST_USER_ID)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["projects"].as_array().unwrap().len(), 2);

    let body: Value = client.list_projects("someone-else").await.json().await.unwrap();
    assert!(body["projects"].as_array().unwrap().is_empty());

    let id = first["id"].as_str().unwrap();
    assert_eq!(client.delete_project(id).await.status(), StatusCode::NO_CONTENT);
    assert_eq!(client.get_project(id).await.status(), StatusCode::NOT_FOUND);
    assert_eq!(client.delete_project(id).await.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_update_settings_validates_patch() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    let project = client.create_analyzed_project("Song").await;
    let id = project["id"].as_str().unwrap();

    let response = client
        .update_settings(id, json!({ "style": "nebula", "resolution": "1080p" }))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["project"]["settings"]["style"], "nebula");
    assert_eq!(body["project"]["settings"]["resolution"], "1080p");

    let response = client.update_settings(id, json!({ "particleCount": 0 })).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// =============================================================================
// Keyframes
// =============================================================================

#[tokio::test]
async fn test_keyframes_must_be_an_array() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    let project = client.create_analyzed_project("Song").await;
    let id = project["id"].as_str().unwrap();

    let response = client.put_keyframes(id, json!({ "time": 0 })).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "keyframes must be an array");

    let response = client
        .put_keyframes(id, json!([keyframe(-1.0, "particles", 100)]))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_visual_state_interpolates_between_keyframes() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    let project = client.create_analyzed_project("Song").await;
    let id = project["id"].as_str().unwrap();

    let response = client
        .put_keyframes(
            id,
            json!([keyframe(10.0, "nebula", 3000), keyframe(0.0, "particles", 1000)]),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = client
        .get_visual_state(id, "time=5&easing=linear")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["state"]["style"], "particles");
    assert_eq!(body["state"]["nextStyle"], "nebula");
    assert_eq!(body["state"]["styleBlend"], 0.0);
    assert_eq!(body["state"]["particleCount"], 2000);

    let body: Value = client
        .get_visual_state(id, "time=9.5&easing=linear&transition=1")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["state"]["styleBlend"], 0.5);

    let body: Value = client
        .get_visual_state(id, "time=30")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["state"]["style"], "nebula");
    assert_eq!(body["state"]["particleCount"], 3000);
}

#[tokio::test]
async fn test_visual_state_snaps_to_beats() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    let project = client.create_analyzed_project("Song").await;
    let id = project["id"].as_str().unwrap();

    let body: Value = client
        .get_visual_state(id, "time=2.05&snapThreshold=0.1")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["time"], 2.0);
    // No keyframes: the project settings apply unchanged
    assert_eq!(body["state"]["style"], project["settings"]["style"]);
}

#[tokio::test]
async fn test_keyframes_from_beats() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    let project = client.create_analyzed_project("Song").await;
    let id = project["id"].as_str().unwrap();

    let response = client
        .keyframes_from_beats(id, json!({ "styles": ["aurora", "ocean"], "every": 2 }))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    let keyframes = body["keyframes"].as_array().unwrap();
    let times: Vec<f64> = keyframes
        .iter()
        .map(|k| k["time"].as_f64().unwrap())
        .collect();
    assert_eq!(times, vec![1.0, 3.0, 5.0]);
    assert_eq!(keyframes[0]["style"], "aurora");
    assert_eq!(keyframes[1]["style"], "ocean");

    let stored = client.get_project(id).await.json::<Value>().await.unwrap();
    assert_eq!(stored["project"]["keyframes"].as_array().unwrap().len(), 3);
}

// =============================================================================
// AI
// =============================================================================

#[tokio::test]
async fn test_style_suggestions_are_cached() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    let project = client.create_analyzed_project("Song").await;
    let id = project["id"].as_str().unwrap();

    let response = client.suggest_styles(id, false).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["overallMood"], "steady, 5 beats");
    assert_eq!(body["recommendedMode"], "ai-hybrid");
    assert_eq!(body["suggestions"][0]["styleId"], "particles");

    // Cached: the mood is not stored, so it comes back empty
    let body: Value = client.suggest_styles(id, false).await.json().await.unwrap();
    assert_eq!(body["overallMood"], "");
    assert_eq!(body["suggestions"].as_array().unwrap().len(), 1);

    let body: Value = client.suggest_styles(id, true).await.json().await.unwrap();
    assert_eq!(body["overallMood"], "steady, 5 beats");

    let body: Value = client.get_suggestions(id).await.json().await.unwrap();
    assert_eq!(body["suggestions"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_style_advisor_not_configured() {
    let server = TestServer::spawn_with(TestServerOptions {
        style_advisor: false,
        ..Default::default()
    })
    .await;
    let client = TestClient::new(server.base_url.clone());
    let project = client.create_analyzed_project("Song").await;
    let id = project["id"].as_str().unwrap();

    let response = client.suggest_styles(id, false).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let response = client.refine_prompt(id, json!({ "prompt": "waves" })).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_refine_prompt() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    let project = client.create_analyzed_project("Song").await;
    let id = project["id"].as_str().unwrap();

    let response = client.refine_prompt(id, json!({})).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body: Value = client
        .refine_prompt(id, json!({ "prompt": "waves" }))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["refinedPrompt"], "waves, cinematic lighting");
}

#[tokio::test]
async fn test_ai_settings_round_trip() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    let project = client.create_analyzed_project("Song").await;
    let id = project["id"].as_str().unwrap();

    let body: Value = client.get_ai_settings(id).await.json().await.unwrap();
    assert_eq!(body["aiSettings"]["mode"], "procedural");

    let body: Value = client
        .update_ai_settings(id, json!({ "mode": "ai-hybrid", "sdPrompt": "neon" }))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["aiSettings"]["mode"], "ai-hybrid");
    assert_eq!(body["aiSettings"]["sdPrompt"], "neon");

    let response = client.update_ai_settings("missing", json!({})).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// =============================================================================
// Server
// =============================================================================

#[tokio::test]
async fn test_stats_endpoint() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let body: Value = client.get_stats().await.json().await.unwrap();

    assert!(body["uptime"].is_string());
    assert_eq!(body["queue"]["queued"], 0);
}
