//! Image generation pipeline.
//!
//! One call covers the whole journey of an asset: optional prompt
//! enhancement, text-to-image inference against the Runware task API,
//! cost accounting, presigned upload through the Media service, and the
//! final upload confirmation. The inference URL is ephemeral; only the
//! returned `media_id` is durable.

use std::sync::Arc;
use std::time::{Duration, Instant};

use mongodb::bson::doc;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use uuid::Uuid;

use worldforge_proto::media::MediaType;

use crate::error::ImageError;
use crate::net::breaker::CircuitBreaker;
use crate::net::retry::{with_retries, RetryPolicy};
use crate::services::MediaGateway;
use crate::storage::models::{ApiRequestHistory, ApiType};
use crate::storage::progress::CostKind;
use crate::storage::Storage;

/// Flat cost charged per generated image, USD.
pub const IMAGE_GENERATION_COST: f64 = 0.0006;

/// Default diffusion model id.
pub const DEFAULT_IMAGE_MODEL: &str = "runware:100@1";

const NEGATIVE_PROMPT: &str =
    "blurry, deformed, disfigured, bad anatomy, ugly, text, watermark";

const RETRY: RetryPolicy = RetryPolicy::new(
    2,
    Duration::from_secs(2),
    Duration::from_secs(30),
);

/// Parameters for one image generation.
#[derive(Debug, Clone, Copy)]
pub struct ImageRequest<'a> {
    pub prompt: &'a str,
    pub world_id: &'a str,
    pub media_type: MediaType,
    /// Required for avatars and post images; `None` for world-level media.
    pub character_id: Option<&'a str>,
    pub width: u32,
    pub height: u32,
    /// Generated when absent.
    pub filename: Option<&'a str>,
    /// Run the prompt through the enhancement endpoint first.
    pub enhance: bool,
    pub model: Option<&'a str>,
    pub task_id: &'a str,
}

/// A generated, uploaded and confirmed image.
#[derive(Debug, Clone)]
pub struct GeneratedImage {
    /// Durable id in the Media service.
    pub media_id: String,
    /// Ephemeral provider URL, for logging only.
    pub image_url: String,
    /// Spend for this image, USD.
    pub cost: f64,
}

/// Client for the image task API plus the media upload pipeline.
pub struct ImageClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    permits: Arc<Semaphore>,
    media: Arc<dyn MediaGateway>,
    storage: Option<Storage>,
    breaker: CircuitBreaker,
    enhance_breaker: CircuitBreaker,
}

impl ImageClient {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        permits: Arc<Semaphore>,
        media: Arc<dyn MediaGateway>,
        storage: Option<Storage>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
            permits,
            media,
            storage,
            breaker: CircuitBreaker::standard("image_generator"),
            enhance_breaker: CircuitBreaker::standard("prompt_enhance"),
        }
    }

    /// Generate, upload and confirm one image.
    pub async fn generate_image(
        &self,
        request: ImageRequest<'_>,
    ) -> Result<GeneratedImage, ImageError> {
        let _permit = self.permit().await;
        let started = Instant::now();

        let prompt = if request.enhance {
            self.enhance_prompt(request.prompt, request.task_id, request.world_id)
                .await
        } else {
            request.prompt.to_string()
        };

        let generated_name;
        let filename = match request.filename {
            Some(name) => name,
            None => {
                generated_name = format!("worldforge_{}.png", Uuid::new_v4());
                &generated_name
            }
        };
        let model = request.model.unwrap_or(DEFAULT_IMAGE_MODEL);

        let request_data = doc! {
            "prompt": &prompt,
            "width": i64::from(request.width),
            "height": i64::from(request.height),
            "model": model,
            "media_type": request.media_type.as_str_name(),
        };

        let prompt_ref: &str = &prompt;
        let request_ref = &request;
        let result = self
            .breaker
            .call(|| {
                with_retries(RETRY, "generate_image", is_transient, move || {
                    self.pipeline(request_ref, prompt_ref, filename, model)
                })
            })
            .await;

        let duration_ms = started.elapsed().as_millis() as i64;
        match result {
            Ok(image) => {
                self.audit(
                    &request,
                    request_data,
                    Some(doc! {
                        "media_id": &image.media_id,
                        "image_url": &image.image_url,
                        "cost": image.cost,
                    }),
                    None,
                    duration_ms,
                )
                .await;
                tracing::info!(
                    world_id = request.world_id,
                    media_id = %image.media_id,
                    duration_ms,
                    "image generated and uploaded",
                );
                Ok(image)
            }
            Err(err) => {
                self.audit(
                    &request,
                    request_data,
                    None,
                    Some(err.to_string()),
                    duration_ms,
                )
                .await;
                tracing::error!(
                    world_id = request.world_id,
                    error = %err,
                    "image generation failed",
                );
                Err(err)
            }
        }
    }

    /// One full attempt: inference, cost, presign, download, PUT, confirm.
    async fn pipeline(
        &self,
        request: &ImageRequest<'_>,
        prompt: &str,
        filename: &str,
        model: &str,
    ) -> Result<GeneratedImage, ImageError> {
        let image_url = self
            .run_inference(prompt, model, request.width, request.height)
            .await?;
        tracing::debug!(url = %image_url, "inference produced image");

        if let Some(storage) = &self.storage {
            // Cost accrues per generation attempt, uploaded or not.
            if let Err(err) = storage
                .increment_cost(request.world_id, CostKind::Image, IMAGE_GENERATION_COST)
                .await
            {
                tracing::warn!(world_id = request.world_id, error = %err, "image cost not recorded");
            }
        }

        let upload = self
            .media
            .presigned_upload_url(
                request.world_id,
                request.character_id.unwrap_or(""),
                filename,
                "image/png",
                0,
                request.media_type,
                request.task_id,
            )
            .await?;

        let bytes = self.download(&image_url).await?;
        self.upload(&upload.upload_url, bytes).await?;
        self.media
            .confirm_upload(&upload.media_id, request.task_id)
            .await?;

        Ok(GeneratedImage {
            media_id: upload.media_id,
            image_url,
            cost: IMAGE_GENERATION_COST,
        })
    }

    async fn run_inference(
        &self,
        prompt: &str,
        model: &str,
        width: u32,
        height: u32,
    ) -> Result<String, ImageError> {
        let tasks = vec![ImageTask {
            task_type: "imageInference",
            task_uuid: Uuid::new_v4().to_string(),
            positive_prompt: prompt,
            negative_prompt: NEGATIVE_PROMPT,
            model,
            width,
            height,
            number_results: 1,
        }];

        let response = self
            .http
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .json(&tasks)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ImageError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: TaskResponse = response
            .json()
            .await
            .map_err(|e| ImageError::Api {
                status: status.as_u16(),
                message: format!("invalid inference payload: {e}"),
            })?;

        body.data
            .into_iter()
            .find_map(|task| task.image_url)
            .ok_or(ImageError::NoImages)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, ImageError> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ImageError::Download {
                status: status.as_u16(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn upload(&self, upload_url: &str, bytes: Vec<u8>) -> Result<(), ImageError> {
        let size = bytes.len();
        let response = self
            .http
            .put(upload_url)
            .header(reqwest::header::CONTENT_TYPE, "image/png")
            .body(bytes)
            .send()
            .await?;

        let status = response.status().as_u16();
        if !matches!(status, 200 | 201 | 204) {
            let message = response.text().await.unwrap_or_default();
            return Err(ImageError::Upload { status, message });
        }
        tracing::debug!(bytes = size, "uploaded image to presigned URL");
        Ok(())
    }

    /// Rewrite a prompt through the enhancement endpoint.
    ///
    /// Best-effort: any failure returns the original prompt so a flaky
    /// enhancer never blocks image generation.
    pub async fn enhance_prompt(&self, prompt: &str, task_id: &str, world_id: &str) -> String {
        let result: Result<String, ImageError> = self
            .enhance_breaker
            .call(|| async move {
                let tasks = vec![EnhanceTask {
                    task_type: "promptEnhance",
                    task_uuid: Uuid::new_v4().to_string(),
                    prompt,
                    prompt_versions: 3,
                    prompt_max_length: 100,
                }];
                let response = self
                    .http
                    .post(&self.base_url)
                    .bearer_auth(&self.api_key)
                    .json(&tasks)
                    .send()
                    .await?;
                let status = response.status();
                if !status.is_success() {
                    let message = response.text().await.unwrap_or_default();
                    return Err(ImageError::Api {
                        status: status.as_u16(),
                        message,
                    });
                }
                let body: TaskResponse = response.json().await.map_err(|e| ImageError::Api {
                    status: status.as_u16(),
                    message: format!("invalid enhancement payload: {e}"),
                })?;
                body.data
                    .into_iter()
                    .find_map(|task| task.text)
                    .ok_or(ImageError::NoImages)
            })
            .await;

        match result {
            Ok(enhanced) => {
                tracing::debug!(task_id, "prompt enhanced");
                enhanced
            }
            Err(err) => {
                tracing::warn!(task_id, world_id, error = %err, "prompt enhancement failed, using original");
                prompt.to_string()
            }
        }
    }

    async fn permit(&self) -> tokio::sync::OwnedSemaphorePermit {
        Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .expect("image permit semaphore closed")
    }

    async fn audit(
        &self,
        request: &ImageRequest<'_>,
        request_data: mongodb::bson::Document,
        response_data: Option<mongodb::bson::Document>,
        error: Option<String>,
        duration_ms: i64,
    ) {
        let Some(storage) = &self.storage else { return };
        let mut entry = ApiRequestHistory::new(
            ApiType::Image,
            request.task_id,
            request.world_id,
            "generate_image",
            request_data,
        );
        entry.response_data = response_data;
        entry.error = error;
        entry.duration_ms = duration_ms;
        storage.log_api_request(entry).await;
    }
}

fn is_transient(err: &ImageError) -> bool {
    match err {
        ImageError::Request(_) | ImageError::Download { .. } | ImageError::Upload { .. } => true,
        ImageError::Api { status, .. } => *status >= 500,
        ImageError::NoImages => true,
        ImageError::Service(inner) => crate::services::is_transient(inner),
        ImageError::CircuitOpen(_) => false,
    }
}

// --- Wire types for the task API ---

#[derive(Serialize)]
struct ImageTask<'a> {
    #[serde(rename = "taskType")]
    task_type: &'static str,
    #[serde(rename = "taskUUID")]
    task_uuid: String,
    #[serde(rename = "positivePrompt")]
    positive_prompt: &'a str,
    #[serde(rename = "negativePrompt")]
    negative_prompt: &'static str,
    model: &'a str,
    width: u32,
    height: u32,
    #[serde(rename = "numberResults")]
    number_results: u32,
}

#[derive(Serialize)]
struct EnhanceTask<'a> {
    #[serde(rename = "taskType")]
    task_type: &'static str,
    #[serde(rename = "taskUUID")]
    task_uuid: String,
    prompt: &'a str,
    #[serde(rename = "promptVersions")]
    prompt_versions: u32,
    #[serde(rename = "promptMaxLength")]
    prompt_max_length: u32,
}

#[derive(Deserialize)]
struct TaskResponse {
    #[serde(default)]
    data: Vec<TaskResult>,
}

#[derive(Deserialize)]
struct TaskResult {
    #[serde(default, rename = "imageURL")]
    image_url: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use crate::services::PresignedUpload;
    use std::sync::Mutex;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Records the presign/confirm sequence and hands out a wiremock URL.
    struct FakeMedia {
        upload_url: String,
        confirmed: Mutex<Vec<String>>,
        fail_presign: bool,
    }

    #[async_trait::async_trait]
    impl MediaGateway for FakeMedia {
        async fn presigned_upload_url(
            &self,
            _world_id: &str,
            _character_id: &str,
            _filename: &str,
            _content_type: &str,
            _size: i64,
            _media_type: MediaType,
            _task_id: &str,
        ) -> Result<PresignedUpload, ServiceError> {
            if self.fail_presign {
                return Err(ServiceError::Rejected {
                    service: "media-service",
                    message: "presign refused".to_string(),
                });
            }
            Ok(PresignedUpload {
                media_id: "media-42".to_string(),
                upload_url: self.upload_url.clone(),
                expires_at: 0,
            })
        }

        async fn confirm_upload(&self, media_id: &str, _task_id: &str) -> Result<(), ServiceError> {
            self.confirmed
                .lock()
                .expect("lock")
                .push(media_id.to_string());
            Ok(())
        }
    }

    fn request() -> ImageRequest<'static> {
        ImageRequest {
            prompt: "a lighthouse made of fog",
            world_id: "world-1",
            media_type: MediaType::WorldHeader,
            character_id: None,
            width: 1024,
            height: 512,
            filename: None,
            enhance: false,
            model: None,
            task_id: "task-1",
        }
    }

    fn client_for(server: &MockServer, media: Arc<FakeMedia>) -> ImageClient {
        ImageClient::new(
            reqwest::Client::new(),
            server.uri(),
            "rw-test",
            Arc::new(Semaphore::new(2)),
            media,
            None,
        )
    }

    #[tokio::test]
    async fn full_pipeline_generates_uploads_and_confirms() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/"))
            .and(body_partial_json(serde_json::json!([
                {"taskType": "imageInference", "numberResults": 1}
            ])))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"taskType": "imageInference", "imageURL": format!("{}/img/1.png", server.uri())}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/img/1.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0x89u8, 0x50, 0x4e, 0x47]))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/upload/1"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let media = Arc::new(FakeMedia {
            upload_url: format!("{}/upload/1", server.uri()),
            confirmed: Mutex::new(vec![]),
            fail_presign: false,
        });
        let client = client_for(&server, Arc::clone(&media));

        let image = client.generate_image(request()).await.expect("image");
        assert_eq!(image.media_id, "media-42");
        assert!(image.image_url.ends_with("/img/1.png"));
        assert!((image.cost - IMAGE_GENERATION_COST).abs() < f64::EPSILON);
        assert_eq!(*media.confirmed.lock().expect("lock"), vec!["media-42"]);
    }

    #[tokio::test]
    async fn empty_inference_data_is_no_images() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": []})))
            .mount(&server)
            .await;

        let media = Arc::new(FakeMedia {
            upload_url: String::new(),
            confirmed: Mutex::new(vec![]),
            fail_presign: false,
        });
        let err = client_for(&server, media)
            .generate_image(request())
            .await
            .unwrap_err();
        assert!(matches!(err, ImageError::NoImages));
    }

    #[tokio::test]
    async fn presign_rejection_fails_without_confirm() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"imageURL": format!("{}/img/2.png", server.uri())}]
            })))
            .mount(&server)
            .await;

        let media = Arc::new(FakeMedia {
            upload_url: String::new(),
            confirmed: Mutex::new(vec![]),
            fail_presign: true,
        });
        let err = client_for(&server, Arc::clone(&media))
            .generate_image(request())
            .await
            .unwrap_err();
        assert!(matches!(err, ImageError::Service(_)), "got: {err}");
        assert!(media.confirmed.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn rejected_upload_put_is_an_upload_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"imageURL": format!("{}/img/3.png", server.uri())}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/img/3.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 2, 3]))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/upload/3"))
            .respond_with(ResponseTemplate::new(403).set_body_string("signature expired"))
            .mount(&server)
            .await;

        let media = Arc::new(FakeMedia {
            upload_url: format!("{}/upload/3", server.uri()),
            confirmed: Mutex::new(vec![]),
            fail_presign: false,
        });
        let err = client_for(&server, Arc::clone(&media))
            .generate_image(request())
            .await
            .unwrap_err();
        assert!(matches!(err, ImageError::Upload { status: 403, .. }), "got: {err}");
        assert!(media.confirmed.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn enhancement_failure_falls_back_to_original_prompt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let media = Arc::new(FakeMedia {
            upload_url: String::new(),
            confirmed: Mutex::new(vec![]),
            fail_presign: false,
        });
        let client = client_for(&server, media);
        let prompt = client.enhance_prompt("raw prompt", "task-1", "world-1").await;
        assert_eq!(prompt, "raw prompt");
    }

    #[tokio::test]
    async fn enhancement_uses_first_candidate() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(body_partial_json(serde_json::json!([
                {"taskType": "promptEnhance", "promptVersions": 3}
            ])))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"text": "better prompt"}, {"text": "also fine"}]
            })))
            .mount(&server)
            .await;

        let media = Arc::new(FakeMedia {
            upload_url: String::new(),
            confirmed: Mutex::new(vec![]),
            fail_presign: false,
        });
        let client = client_for(&server, media);
        let prompt = client.enhance_prompt("raw prompt", "task-1", "world-1").await;
        assert_eq!(prompt, "better prompt");
    }
}
