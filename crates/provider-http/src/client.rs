// HTTP Generation Provider
//
// Talks to a long-running generation API: start returns an operation name,
// status is polled on the operation resource, and the finished operation
// carries the output URI in its response body. Every outbound call is
// recorded through the CallAudit port when one is wired in.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, warn};

use genqueue_core::domain::OperationClass;
use genqueue_core::port::{
    CallAudit, CallKind, GenerationProvider, OperationStatus, ProviderCall, ProviderError,
    StartRequest, TimeProvider,
};

/// 1x1 transparent PNG, base64. Text-to-video requests are image-to-video
/// requests with this placeholder as the source frame.
const PLACEHOLDER_IMAGE_B64: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: String,
    pub video_model: String,
    pub image_model: String,
    pub request_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            api_key: String::new(),
            video_model: "veo-3.0-generate-001".to_string(),
            image_model: "gemini-2.5-flash-image".to_string(),
            request_timeout_secs: 30,
        }
    }
}

pub struct HttpGenerationProvider {
    client: reqwest::Client,
    config: ProviderConfig,
    call_audit: Option<Arc<dyn CallAudit>>,
    time_provider: Arc<dyn TimeProvider>,
}

impl HttpGenerationProvider {
    pub fn new(
        config: ProviderConfig,
        call_audit: Option<Arc<dyn CallAudit>>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            config,
            call_audit,
            time_provider,
        })
    }

    fn model_for(&self, class: OperationClass) -> &str {
        match class {
            OperationClass::TextToVideo | OperationClass::ImageToVideo => &self.config.video_model,
            OperationClass::ImageEdit => &self.config.image_model,
        }
    }

    async fn audit(
        &self,
        job_id: Option<&str>,
        handle: Option<&str>,
        kind: CallKind,
        status_code: Option<u16>,
        error: Option<&ProviderError>,
        started: Instant,
    ) {
        let Some(audit) = &self.call_audit else {
            return;
        };
        let call = ProviderCall {
            job_id: job_id.map(|s| s.to_string()),
            handle: handle.map(|s| s.to_string()),
            kind,
            status_code,
            ok: error.is_none(),
            error_message: error.map(|e| e.to_string()),
            duration_ms: started.elapsed().as_millis() as i64,
            created_at: self.time_provider.now_millis(),
        };
        if let Err(err) = audit.record(call).await {
            warn!(error = %err, "Failed to record provider call");
        }
    }

    async fn get_operation(&self, handle: &str) -> Result<(u16, serde_json::Value), ProviderError> {
        let url = format!("{}/v1beta/{}", self.config.base_url, handle);
        let response = self
            .client
            .get(&url)
            .header("x-goog-api-key", &self.config.api_key)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        Ok((status, body))
    }
}

#[async_trait]
impl GenerationProvider for HttpGenerationProvider {
    async fn start_operation(&self, request: &StartRequest) -> Result<String, ProviderError> {
        let started = Instant::now();
        let model = self.model_for(request.operation_class);
        let url = format!(
            "{}/v1beta/models/{}:predictLongRunning",
            self.config.base_url, model
        );
        let body = build_start_body(request.operation_class, &request.payload)?;

        let outcome: Result<(u16, String), (Option<u16>, ProviderError)> = async {
            let response = self
                .client
                .post(&url)
                .header("x-goog-api-key", &self.config.api_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| (None, ProviderError::Transport(e.to_string())))?;

            let status = response.status().as_u16();
            let body: serde_json::Value = response
                .json()
                .await
                .map_err(|e| (None, ProviderError::Transport(e.to_string())))?;

            if status >= 400 {
                return Err((Some(status), classify_status(status, &body)));
            }

            match body.get("name").and_then(|v| v.as_str()) {
                Some(name) => Ok((status, name.to_string())),
                None => Err((
                    Some(status),
                    ProviderError::Api {
                        status,
                        message: "start response missing operation name".to_string(),
                    },
                )),
            }
        }
        .await;

        match outcome {
            Ok((status, name)) => {
                debug!(job_id = %request.job_id, handle = %name, "Operation started");
                self.audit(
                    Some(&request.job_id),
                    Some(&name),
                    CallKind::Start,
                    Some(status),
                    None,
                    started,
                )
                .await;
                Ok(name)
            }
            Err((status, err)) => {
                self.audit(
                    Some(&request.job_id),
                    None,
                    CallKind::Start,
                    status,
                    Some(&err),
                    started,
                )
                .await;
                Err(err)
            }
        }
    }

    async fn operation_status(&self, handle: &str) -> Result<OperationStatus, ProviderError> {
        let started = Instant::now();
        let outcome = async {
            let (status, body) = self.get_operation(handle).await?;
            if status >= 400 {
                return Err(classify_status(status, &body));
            }
            Ok((status, parse_operation(&body)))
        }
        .await;

        match outcome {
            Ok((status, op)) => {
                self.audit(None, Some(handle), CallKind::Poll, Some(status), None, started)
                    .await;
                Ok(op)
            }
            Err(err) => {
                let code = http_status_of(&err);
                self.audit(None, Some(handle), CallKind::Poll, code, Some(&err), started)
                    .await;
                Err(err)
            }
        }
    }

    async fn fetch_result(&self, handle: &str) -> Result<String, ProviderError> {
        let started = Instant::now();
        let outcome = async {
            let (status, body) = self.get_operation(handle).await?;
            if status >= 400 {
                return Err(classify_status(status, &body));
            }
            let op = parse_operation(&body);
            match op.result_uri {
                Some(uri) => Ok((status, uri)),
                None => Err(ProviderError::Api {
                    status,
                    message: "finished operation carries no output uri".to_string(),
                }),
            }
        }
        .await;

        match outcome {
            Ok((status, uri)) => {
                self.audit(None, Some(handle), CallKind::Result, Some(status), None, started)
                    .await;
                Ok(uri)
            }
            Err(err) => {
                let code = http_status_of(&err);
                self.audit(None, Some(handle), CallKind::Result, code, Some(&err), started)
                    .await;
                Err(err)
            }
        }
    }
}

/// Map an HTTP error status to a classified provider error
fn classify_status(status: u16, body: &serde_json::Value) -> ProviderError {
    let message = body
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .unwrap_or("no error message")
        .to_string();

    match status {
        429 => ProviderError::QuotaExceeded(message),
        502 | 503 => ProviderError::Unavailable { status, message },
        401 | 403 => ProviderError::AuthFailed(message),
        404 => ProviderError::NotFound(message),
        _ => ProviderError::Api { status, message },
    }
}

fn http_status_of(err: &ProviderError) -> Option<u16> {
    match err {
        ProviderError::QuotaExceeded(_) => Some(429),
        ProviderError::Unavailable { status, .. } => Some(*status),
        ProviderError::AuthFailed(_) => Some(401),
        ProviderError::NotFound(_) => Some(404),
        ProviderError::Api { status, .. } => Some(*status),
        _ => None,
    }
}

/// Build the predictLongRunning request body from the job payload
fn build_start_body(
    class: OperationClass,
    payload: &serde_json::Value,
) -> Result<serde_json::Value, ProviderError> {
    let prompt = payload
        .get("prompt")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ProviderError::Api {
            status: 0,
            message: "payload missing prompt".to_string(),
        })?;

    let mut instance = serde_json::json!({ "prompt": prompt });

    match class {
        OperationClass::TextToVideo => {
            // same wire shape as image-to-video, seeded with a blank frame
            instance["image"] = serde_json::json!({
                "bytesBase64Encoded": PLACEHOLDER_IMAGE_B64,
                "mimeType": "image/png",
            });
        }
        OperationClass::ImageToVideo | OperationClass::ImageEdit => {
            let image = payload
                .get("image")
                .and_then(|v| v.as_str())
                .ok_or_else(|| ProviderError::Api {
                    status: 0,
                    message: "payload missing source image".to_string(),
                })?;
            let mime = payload
                .get("mime_type")
                .and_then(|v| v.as_str())
                .unwrap_or("image/png");
            instance["image"] = serde_json::json!({
                "bytesBase64Encoded": image,
                "mimeType": mime,
            });
        }
    }

    let mut parameters = serde_json::Map::new();
    if let Some(ratio) = payload.get("aspect_ratio").and_then(|v| v.as_str()) {
        parameters.insert("aspectRatio".to_string(), ratio.into());
    }
    if let Some(negative) = payload.get("negative_prompt").and_then(|v| v.as_str()) {
        parameters.insert("negativePrompt".to_string(), negative.into());
    }

    Ok(serde_json::json!({
        "instances": [instance],
        "parameters": serde_json::Value::Object(parameters),
    }))
}

/// Extract an OperationStatus from an operation resource body
fn parse_operation(body: &serde_json::Value) -> OperationStatus {
    let done = body.get("done").and_then(|v| v.as_bool()).unwrap_or(false);
    let error = body
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let result_uri = body
        .pointer("/response/generateVideoResponse/generatedSamples/0/video/uri")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let state = if let Some(s) = body.pointer("/metadata/state").and_then(|v| v.as_str()) {
        s.to_string()
    } else if done && error.is_none() {
        "COMPLETED".to_string()
    } else if done {
        "FAILED".to_string()
    } else {
        "RUNNING".to_string()
    };

    OperationStatus {
        done,
        state,
        result_uri,
        error,
    }
}
