use axum::extract::FromRef;

use crate::analyzer::AudioAnalyzer;
use crate::projects::ProjectStore;
use crate::render_queue::RenderQueue;
use crate::style_advisor::StyleAdvisor;
use std::sync::Arc;
use std::time::Instant;

use super::ServerConfig;

pub type GuardedProjectStore = Arc<dyn ProjectStore>;
pub type GuardedRenderQueue = Arc<RenderQueue>;
pub type GuardedAnalyzer = Arc<dyn AudioAnalyzer>;
pub type OptionalStyleAdvisor = Option<Arc<dyn StyleAdvisor>>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub projects: GuardedProjectStore,
    pub render_queue: GuardedRenderQueue,
    pub analyzer: GuardedAnalyzer,
    pub style_advisor: OptionalStyleAdvisor,
    pub hash: String,
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}

impl FromRef<ServerState> for GuardedProjectStore {
    fn from_ref(input: &ServerState) -> Self {
        input.projects.clone()
    }
}

impl FromRef<ServerState> for GuardedRenderQueue {
    fn from_ref(input: &ServerState) -> Self {
        input.render_queue.clone()
    }
}

impl FromRef<ServerState> for GuardedAnalyzer {
    fn from_ref(input: &ServerState) -> Self {
        input.analyzer.clone()
    }
}

impl FromRef<ServerState> for OptionalStyleAdvisor {
    fn from_ref(input: &ServerState) -> Self {
        input.style_advisor.clone()
    }
}
