mod ai_routes;
mod api_error;
pub mod config;
mod http_layers;
pub mod metrics;
mod project_routes;
mod render_routes;
pub mod server;
pub mod state;

pub use api_error::{ApiError, ApiResult};
pub use config::ServerConfig;
pub use http_layers::*;
pub use server::{make_app, run_server};
pub use state::ServerState;
