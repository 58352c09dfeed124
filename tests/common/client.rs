//! HTTP client for end-to-end tests
//!
//! This module provides a high-level HTTP client that wraps reqwest
//! and provides methods for all render-server endpoints.
//!
//! When API routes or request formats change, update only this file.

use super::constants::*;
use reqwest::Response;
use serde_json::{json, Value};
use std::time::Duration;

pub struct TestClient {
    /// The underlying reqwest client (public for custom requests in tests)
    pub client: reqwest::Client,
    /// The base URL of the test server
    pub base_url: String,
}

#[allow(dead_code)]
impl TestClient {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build reqwest client");

        Self { client, base_url }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get(&self, path: &str) -> Response {
        self.client
            .get(self.url(path))
            .send()
            .await
            .expect("Request failed")
    }

    async fn send_json(&self, method: reqwest::Method, path: &str, body: Value) -> Response {
        self.client
            .request(method, self.url(path))
            .json(&body)
            .send()
            .await
            .expect("Request failed")
    }

    // ========================================================================
    // Server
    // ========================================================================

    pub async fn get_stats(&self) -> Response {
        self.get("/").await
    }

    pub async fn get_output(&self, path: &str) -> Response {
        self.get(&format!("/outputs/{}", path)).await
    }

    // ========================================================================
    // Projects
    // ========================================================================

    pub async fn create_project(&self, name: &str) -> Response {
        self.send_json(
            reqwest::Method::POST,
            "/v1/projects",
            json!({ "userId": TEST_USER_ID, "name": name, "audioPath": TEST_AUDIO_PATH }),
        )
        .await
    }

    pub async fn create_project_raw(&self, body: Value) -> Response {
        self.send_json(reqwest::Method::POST, "/v1/projects", body)
            .await
    }

    pub async fn list_projects(&self, user_id: &str) -> Response {
        self.get(&format!("/v1/projects?userId={}", user_id)).await
    }

    pub async fn get_project(&self, id: &str) -> Response {
        self.get(&format!("/v1/projects/{}", id)).await
    }

    pub async fn delete_project(&self, id: &str) -> Response {
        self.client
            .delete(self.url(&format!("/v1/projects/{}", id)))
            .send()
            .await
            .expect("Request failed")
    }

    pub async fn update_settings(&self, id: &str, patch: Value) -> Response {
        self.send_json(
            reqwest::Method::PATCH,
            &format!("/v1/projects/{}/settings", id),
            patch,
        )
        .await
    }

    pub async fn put_keyframes(&self, id: &str, keyframes: Value) -> Response {
        self.send_json(
            reqwest::Method::PUT,
            &format!("/v1/projects/{}/keyframes", id),
            json!({ "keyframes": keyframes }),
        )
        .await
    }

    pub async fn keyframes_from_beats(&self, id: &str, body: Value) -> Response {
        self.send_json(
            reqwest::Method::POST,
            &format!("/v1/projects/{}/keyframes/from-beats", id),
            body,
        )
        .await
    }

    pub async fn get_visual_state(&self, id: &str, query: &str) -> Response {
        self.get(&format!("/v1/projects/{}/state?{}", id, query))
            .await
    }

    /// Creates a project and waits for the fake analysis to land.
    pub async fn create_analyzed_project(&self, name: &str) -> Value {
        let response = self.create_project(name).await;
        assert_eq!(response.status(), reqwest::StatusCode::CREATED);
        let body: Value = response.json().await.unwrap();
        let id = body["project"]["id"].as_str().unwrap().to_string();

        self.wait_for_project(&id, |p| p["audioMetadata"].is_object())
            .await
    }

    /// Polls the project until `done` holds, panicking after the settle timeout.
    pub async fn wait_for_project(&self, id: &str, done: impl Fn(&Value) -> bool) -> Value {
        let start = std::time::Instant::now();
        loop {
            let body: Value = self.get_project(id).await.json().await.unwrap();
            if done(&body["project"]) {
                return body["project"].clone();
            }
            if start.elapsed() > Duration::from_millis(SETTLE_TIMEOUT_MS) {
                panic!("Project {} did not settle: {}", id, body);
            }
            tokio::time::sleep(Duration::from_millis(SETTLE_POLL_INTERVAL_MS)).await;
        }
    }

    // ========================================================================
    // Render
    // ========================================================================

    pub async fn start_render(&self, project_id: &str) -> Response {
        self.client
            .post(self.url(&format!("/v1/render/{}/start", project_id)))
            .send()
            .await
            .expect("Request failed")
    }

    pub async fn render_status(&self, project_id: &str, job_id: Option<&str>) -> Response {
        match job_id {
            Some(job_id) => {
                self.get(&format!("/v1/render/{}/status?jobId={}", project_id, job_id))
                    .await
            }
            None => self.get(&format!("/v1/render/{}/status", project_id)).await,
        }
    }

    pub async fn render_status_stream(&self, project_id: &str, job_id: &str) -> Response {
        self.get(&format!(
            "/v1/render/{}/status/stream?jobId={}",
            project_id, job_id
        ))
        .await
    }

    pub async fn upload_frames(&self, project_id: &str, frames: Value) -> Response {
        self.send_json(
            reqwest::Method::POST,
            &format!("/v1/render/{}/frames", project_id),
            json!({ "frames": frames }),
        )
        .await
    }

    /// Polls the render status until the job is `completed` or `failed`.
    pub async fn wait_for_job(&self, project_id: &str, job_id: &str) -> Value {
        self.wait_for_status(project_id, job_id, |body| {
            let state = body["job"]["state"].as_str().unwrap_or_default();
            state == "completed" || state == "failed"
        })
        .await
    }

    /// Polls the render status until `done` holds for the whole response.
    pub async fn wait_for_status(
        &self,
        project_id: &str,
        job_id: &str,
        done: impl Fn(&Value) -> bool,
    ) -> Value {
        let start = std::time::Instant::now();
        loop {
            let body: Value = self
                .render_status(project_id, Some(job_id))
                .await
                .json()
                .await
                .unwrap();
            if done(&body) {
                return body;
            }
            if start.elapsed() > Duration::from_millis(SETTLE_TIMEOUT_MS) {
                panic!("Job {} did not finish: {}", job_id, body);
            }
            tokio::time::sleep(Duration::from_millis(SETTLE_POLL_INTERVAL_MS)).await;
        }
    }

    // ========================================================================
    // AI
    // ========================================================================

    pub async fn suggest_styles(&self, project_id: &str, refresh: bool) -> Response {
        self.client
            .post(self.url(&format!(
                "/v1/ai/{}/suggest-styles?refresh={}",
                project_id, refresh
            )))
            .send()
            .await
            .expect("Request failed")
    }

    pub async fn get_suggestions(&self, project_id: &str) -> Response {
        self.get(&format!("/v1/ai/{}/suggestions", project_id)).await
    }

    pub async fn refine_prompt(&self, project_id: &str, body: Value) -> Response {
        self.send_json(
            reqwest::Method::POST,
            &format!("/v1/ai/{}/refine-prompt", project_id),
            body,
        )
        .await
    }

    pub async fn get_ai_settings(&self, project_id: &str) -> Response {
        self.get(&format!("/v1/ai/{}/settings", project_id)).await
    }

    pub async fn update_ai_settings(&self, project_id: &str, patch: Value) -> Response {
        self.send_json(
            reqwest::Method::POST,
            &format!("/v1/ai/{}/settings", project_id),
            patch,
        )
        .await
    }
}
