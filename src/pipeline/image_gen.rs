//! Text-to-image generation through a hosted prediction API.

use crate::config::AiSettings;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ImageGenError {
    #[error("Image API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Prediction failed: {0}")]
    PredictionFailed(String),

    #[error("Prediction was canceled")]
    Canceled,

    #[error("Prediction timed out")]
    Timeout,

    #[error("Prediction succeeded without an output image")]
    MissingOutput,

    #[error("Image download failed: {0}")]
    Download(String),

    #[error("Connection error: {0}")]
    Connection(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageRequest {
    pub prompt: String,
    pub negative_prompt: String,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub guidance: f64,
    pub seed: u64,
    /// `owner/name:version`; the generator default is used when absent.
    pub model: Option<String>,
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Generates one image and stores it at `dest`, returning the path written.
    async fn generate(&self, request: &ImageRequest, dest: &Path)
        -> Result<PathBuf, ImageGenError>;
}

pub struct ReplicateClient {
    client: Client,
    base_url: String,
    api_token: String,
    default_model: String,
    poll_interval: Duration,
    timeout: Duration,
}

#[derive(Serialize)]
struct PredictionRequest<'a> {
    version: &'a str,
    input: PredictionInput<'a>,
}

#[derive(Serialize)]
struct PredictionInput<'a> {
    prompt: &'a str,
    negative_prompt: &'a str,
    width: u32,
    height: u32,
    num_inference_steps: u32,
    guidance_scale: f64,
    seed: u64,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    id: String,
    status: String,
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

impl ReplicateClient {
    pub fn new(api_token: impl Into<String>, settings: &AiSettings) -> Self {
        Self {
            client: Client::new(),
            base_url: settings.replicate_base_url.trim_end_matches('/').to_string(),
            api_token: api_token.into(),
            default_model: settings.sd_model.clone(),
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
            timeout: Duration::from_secs(settings.prediction_timeout_secs),
        }
    }

    async fn create_prediction(&self, request: &ImageRequest) -> Result<Prediction, ImageGenError> {
        let model = request.model.as_deref().unwrap_or(&self.default_model);
        let body = PredictionRequest {
            version: model_version(model),
            input: PredictionInput {
                prompt: &request.prompt,
                negative_prompt: &request.negative_prompt,
                width: request.width,
                height: request.height,
                num_inference_steps: request.steps,
                guidance_scale: request.guidance,
                seed: request.seed,
            },
        };

        let response = self
            .client
            .post(format!("{}/v1/predictions", self.base_url))
            .bearer_auth(&self.api_token)
            .json(&body)
            .send()
            .await
            .map_err(connection_error)?;
        read_prediction(response).await
    }

    async fn get_prediction(&self, id: &str) -> Result<Prediction, ImageGenError> {
        let response = self
            .client
            .get(format!("{}/v1/predictions/{}", self.base_url, id))
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(connection_error)?;
        read_prediction(response).await
    }

    /// Polls until the prediction settles, returning the first output URL.
    async fn wait_for_output(&self, mut prediction: Prediction) -> Result<String, ImageGenError> {
        let started = Instant::now();
        loop {
            match prediction.status.as_str() {
                "succeeded" => return first_output_url(prediction.output.as_ref()),
                "failed" => {
                    let message = match prediction.error {
                        Some(Value::String(s)) => s,
                        Some(other) => other.to_string(),
                        None => "unknown error".to_string(),
                    };
                    return Err(ImageGenError::PredictionFailed(message));
                }
                "canceled" => return Err(ImageGenError::Canceled),
                _ => {}
            }
            if started.elapsed() >= self.timeout {
                return Err(ImageGenError::Timeout);
            }
            tokio::time::sleep(self.poll_interval).await;
            prediction = self.get_prediction(&prediction.id).await?;
        }
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<(), ImageGenError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ImageGenError::Download(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ImageGenError::Download(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| ImageGenError::Download(format!("{:?}: {}", dest, e)))?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ImageGenError::Download(e.to_string()))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| ImageGenError::Download(format!("{:?}: {}", dest, e)))?;
        }
        file.flush()
            .await
            .map_err(|e| ImageGenError::Download(format!("{:?}: {}", dest, e)))?;
        Ok(())
    }
}

#[async_trait]
impl ImageGenerator for ReplicateClient {
    async fn generate(
        &self,
        request: &ImageRequest,
        dest: &Path,
    ) -> Result<PathBuf, ImageGenError> {
        let prediction = self.create_prediction(request).await?;
        debug!(prediction_id = %prediction.id, seed = request.seed, "Prediction created");
        let url = self.wait_for_output(prediction).await?;
        self.download(&url, dest).await?;
        Ok(dest.to_path_buf())
    }
}

/// The version hash of an `owner/name:version` reference, or the input as-is.
pub fn model_version(model: &str) -> &str {
    model.rsplit_once(':').map(|(_, v)| v).unwrap_or(model)
}

fn first_output_url(output: Option<&Value>) -> Result<String, ImageGenError> {
    match output {
        Some(Value::String(url)) => Ok(url.clone()),
        Some(Value::Array(items)) => items
            .first()
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(ImageGenError::MissingOutput),
        _ => Err(ImageGenError::MissingOutput),
    }
}

fn connection_error(e: reqwest::Error) -> ImageGenError {
    if e.is_timeout() {
        ImageGenError::Timeout
    } else {
        ImageGenError::Connection(e.to_string())
    }
}

async fn read_prediction(response: reqwest::Response) -> Result<Prediction, ImageGenError> {
    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(ImageGenError::Api {
            status: status.as_u16(),
            message,
        });
    }
    response
        .json::<Prediction>()
        .await
        .map_err(|e| ImageGenError::Connection(format!("Malformed prediction: {}", e)))
}
