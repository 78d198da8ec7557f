//! Gateway to the four downstream gRPC services.
//!
//! Addresses come from the service registry (with DNS fallback), channels
//! from the shared channel map, and every call runs under the gRPC permit,
//! behind a per-service circuit breaker, with a bounded internal retry for
//! transient statuses. Calls are recorded in the API audit log.

use std::sync::Arc;
use std::time::Instant;

use mongodb::bson::{doc, Document};
use tokio::sync::Semaphore;
use tonic::Code;

use worldforge_proto::character::character_service_client::CharacterServiceClient;
use worldforge_proto::character::{
    Character, CreateCharacterRequest, GetCharacterRequest, UpdateCharacterRequest,
};
use worldforge_proto::media::media_service_client::MediaServiceClient;
use worldforge_proto::media::{
    ConfirmUploadRequest, GetPresignedUploadUrlRequest, MediaType,
};
use worldforge_proto::post::post_service_client::PostServiceClient;
use worldforge_proto::post::CreateAiPostRequest;
use worldforge_proto::world::world_service_client::WorldServiceClient;
use worldforge_proto::world::{
    GetWorldRequest, UpdateWorldImagesRequest, UpdateWorldParamsRequest, WorldResponse,
};

use crate::error::ServiceError;
use crate::net::breaker::CircuitBreaker;
use crate::net::retry::{with_retries, RetryPolicy};
use crate::net::ServiceDiscovery;
use crate::resources::GrpcChannels;
use crate::storage::models::{ApiRequestHistory, ApiType};
use crate::storage::Storage;

const WORLD: &str = "world-service";
const CHARACTER: &str = "character-service";
const POST: &str = "post-service";
const MEDIA: &str = "media-service";

/// Internal retry for transient statuses; breakers sit outside of it.
const SERVICE_RETRY: RetryPolicy = RetryPolicy::standard();

/// A presigned upload slot issued by the Media service.
#[derive(Debug, Clone)]
pub struct PresignedUpload {
    pub media_id: String,
    pub upload_url: String,
    pub expires_at: i64,
}

/// The slice of the Media service the image pipeline needs.
///
/// A trait so the pipeline is testable without a live gRPC server.
#[async_trait::async_trait]
pub trait MediaGateway: Send + Sync {
    async fn presigned_upload_url(
        &self,
        world_id: &str,
        character_id: &str,
        filename: &str,
        content_type: &str,
        size: i64,
        media_type: MediaType,
        task_id: &str,
    ) -> Result<PresignedUpload, ServiceError>;

    async fn confirm_upload(&self, media_id: &str, task_id: &str) -> Result<(), ServiceError>;
}

/// Typed operations against the World, Character, Post and Media services.
pub struct ServiceClient {
    discovery: Arc<ServiceDiscovery>,
    channels: Arc<GrpcChannels>,
    permits: Arc<Semaphore>,
    storage: Option<Storage>,
    world_breaker: CircuitBreaker,
    character_breaker: CircuitBreaker,
    post_breaker: CircuitBreaker,
    media_breaker: CircuitBreaker,
}

pub(crate) fn is_transient(err: &ServiceError) -> bool {
    match err {
        ServiceError::Rpc { status, .. } => matches!(
            status.code(),
            Code::Unavailable | Code::DeadlineExceeded | Code::Aborted | Code::Unknown
        ),
        // Channel construction may race a restarting service.
        ServiceError::Channel { .. } => true,
        ServiceError::CircuitOpen(_) | ServiceError::Rejected { .. } => false,
    }
}

impl ServiceClient {
    pub fn new(
        discovery: Arc<ServiceDiscovery>,
        channels: Arc<GrpcChannels>,
        permits: Arc<Semaphore>,
        storage: Option<Storage>,
    ) -> Self {
        Self {
            discovery,
            channels,
            permits,
            storage,
            world_breaker: CircuitBreaker::standard("world_service"),
            character_breaker: CircuitBreaker::standard("character_service"),
            post_breaker: CircuitBreaker::standard("post_service"),
            media_breaker: CircuitBreaker::standard("media_service"),
        }
    }

    async fn channel(
        &self,
        service: &'static str,
    ) -> Result<tonic::transport::Channel, ServiceError> {
        let address = self.discovery.resolve(service).await;
        self.channels
            .get(&address)
            .await
            .map_err(|source| ServiceError::Channel { service, source })
    }

    fn breaker_for(&self, service: &'static str) -> &CircuitBreaker {
        match service {
            CHARACTER => &self.character_breaker,
            POST => &self.post_breaker,
            MEDIA => &self.media_breaker,
            _ => &self.world_breaker,
        }
    }

    /// Permit + breaker + bounded retry + audit around one RPC.
    async fn execute<T, Fut>(
        &self,
        service: &'static str,
        method: &'static str,
        task_id: &str,
        world_id: &str,
        request_data: Document,
        op: impl Fn() -> Fut,
    ) -> Result<T, ServiceError>
    where
        Fut: std::future::Future<Output = Result<(T, Document), ServiceError>>,
    {
        let _permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .expect("gRPC permit semaphore closed");
        let started = Instant::now();

        let result = self
            .breaker_for(service)
            .call(|| with_retries(SERVICE_RETRY, method, is_transient, || op()))
            .await;

        let duration_ms = started.elapsed().as_millis() as i64;
        if let Some(storage) = &self.storage {
            let mut entry = ApiRequestHistory::new(
                ApiType::Grpc,
                task_id,
                world_id,
                format!("{service}_{method}"),
                request_data,
            );
            entry.duration_ms = duration_ms;
            match &result {
                Ok((_, response)) => entry.response_data = Some(response.clone()),
                Err(err) => entry.error = Some(err.to_string()),
            }
            storage.log_api_request(entry).await;
        }

        match result {
            Ok((value, _)) => Ok(value),
            Err(err) => {
                tracing::error!(service, method, error = %err, "service call failed");
                Err(err)
            }
        }
    }

    // --- World service ---

    pub async fn get_world(
        &self,
        world_id: &str,
        task_id: &str,
    ) -> Result<WorldResponse, ServiceError> {
        self.execute(
            WORLD,
            "GetWorld",
            task_id,
            world_id,
            doc! {"id": world_id},
            || async move {
                let channel = self.channel(WORLD).await?;
                let mut client = WorldServiceClient::new(channel);
                let response = client
                    .get_world(GetWorldRequest {
                        id: world_id.to_string(),
                    })
                    .await
                    .map_err(|status| ServiceError::Rpc {
                        service: WORLD,
                        status,
                    })?
                    .into_inner();
                let summary = doc! {"id": &response.id, "name": &response.name};
                Ok((response, summary))
            },
        )
        .await
    }

    pub async fn update_world_params(
        &self,
        world_id: &str,
        params_json: &str,
        task_id: &str,
    ) -> Result<(), ServiceError> {
        self.execute(
            WORLD,
            "UpdateWorldParams",
            task_id,
            world_id,
            doc! {"id": world_id, "params_bytes": params_json.len() as i64},
            || async move {
                let channel = self.channel(WORLD).await?;
                let mut client = WorldServiceClient::new(channel);
                let response = client
                    .update_world_params(UpdateWorldParamsRequest {
                        id: world_id.to_string(),
                        params: params_json.to_string(),
                        task_id: task_id.to_string(),
                    })
                    .await
                    .map_err(|status| ServiceError::Rpc {
                        service: WORLD,
                        status,
                    })?
                    .into_inner();
                if !response.success {
                    return Err(ServiceError::Rejected {
                        service: WORLD,
                        message: "world params update was not accepted".to_string(),
                    });
                }
                Ok(((), doc! {"success": true}))
            },
        )
        .await
    }

    pub async fn update_world_images(
        &self,
        world_id: &str,
        header_media_id: &str,
        icon_media_id: &str,
        task_id: &str,
    ) -> Result<(), ServiceError> {
        self.execute(
            WORLD,
            "UpdateWorldImages",
            task_id,
            world_id,
            doc! {
                "id": world_id,
                "header_image_id": header_media_id,
                "icon_image_id": icon_media_id,
            },
            || async move {
                let channel = self.channel(WORLD).await?;
                let mut client = WorldServiceClient::new(channel);
                let response = client
                    .update_world_images(UpdateWorldImagesRequest {
                        id: world_id.to_string(),
                        header_image_id: header_media_id.to_string(),
                        icon_image_id: icon_media_id.to_string(),
                    })
                    .await
                    .map_err(|status| ServiceError::Rpc {
                        service: WORLD,
                        status,
                    })?
                    .into_inner();
                if !response.success {
                    return Err(ServiceError::Rejected {
                        service: WORLD,
                        message: "world image update was not accepted".to_string(),
                    });
                }
                Ok(((), doc! {"success": true}))
            },
        )
        .await
    }

    // --- Character service ---

    pub async fn create_character(
        &self,
        world_id: &str,
        display_name: &str,
        meta_json: Option<&str>,
        avatar_media_id: Option<&str>,
        task_id: &str,
    ) -> Result<Character, ServiceError> {
        self.execute(
            CHARACTER,
            "CreateCharacter",
            task_id,
            world_id,
            doc! {"world_id": world_id, "display_name": display_name},
            || async move {
                let channel = self.channel(CHARACTER).await?;
                let mut client = CharacterServiceClient::new(channel);
                let response = client
                    .create_character(CreateCharacterRequest {
                        world_id: world_id.to_string(),
                        display_name: display_name.to_string(),
                        meta: meta_json.map(str::to_string),
                        avatar_media_id: avatar_media_id.map(str::to_string),
                    })
                    .await
                    .map_err(|status| ServiceError::Rpc {
                        service: CHARACTER,
                        status,
                    })?
                    .into_inner();
                let summary = doc! {"id": &response.id, "display_name": &response.display_name};
                Ok((response, summary))
            },
        )
        .await
    }

    pub async fn get_character(
        &self,
        character_id: &str,
        task_id: &str,
    ) -> Result<Character, ServiceError> {
        self.execute(
            CHARACTER,
            "GetCharacter",
            task_id,
            "",
            doc! {"character_id": character_id},
            || async move {
                let channel = self.channel(CHARACTER).await?;
                let mut client = CharacterServiceClient::new(channel);
                let response = client
                    .get_character(GetCharacterRequest {
                        character_id: character_id.to_string(),
                    })
                    .await
                    .map_err(|status| ServiceError::Rpc {
                        service: CHARACTER,
                        status,
                    })?
                    .into_inner();
                let summary = doc! {"id": &response.id};
                Ok((response, summary))
            },
        )
        .await
    }

    pub async fn update_character(
        &self,
        character_id: &str,
        display_name: Option<&str>,
        avatar_media_id: Option<&str>,
        meta_json: Option<&str>,
        task_id: &str,
    ) -> Result<Character, ServiceError> {
        self.execute(
            CHARACTER,
            "UpdateCharacter",
            task_id,
            "",
            doc! {"character_id": character_id},
            || async move {
                let channel = self.channel(CHARACTER).await?;
                let mut client = CharacterServiceClient::new(channel);
                let response = client
                    .update_character(UpdateCharacterRequest {
                        character_id: character_id.to_string(),
                        display_name: display_name.map(str::to_string),
                        avatar_media_id: avatar_media_id.map(str::to_string),
                        meta: meta_json.map(str::to_string),
                    })
                    .await
                    .map_err(|status| ServiceError::Rpc {
                        service: CHARACTER,
                        status,
                    })?
                    .into_inner();
                let summary = doc! {"id": &response.id};
                Ok((response, summary))
            },
        )
        .await
    }

    // --- Post service ---

    pub async fn create_ai_post(
        &self,
        character_id: &str,
        caption: &str,
        media_id: &str,
        world_id: &str,
        tags: &[String],
        task_id: &str,
    ) -> Result<(String, String), ServiceError> {
        self.execute(
            POST,
            "CreateAIPost",
            task_id,
            world_id,
            doc! {
                "character_id": character_id,
                "media_id": media_id,
                "tags": tags.to_vec(),
            },
            || async move {
                let channel = self.channel(POST).await?;
                let mut client = PostServiceClient::new(channel);
                let response = client
                    .create_ai_post(CreateAiPostRequest {
                        character_id: character_id.to_string(),
                        caption: caption.to_string(),
                        media_id: media_id.to_string(),
                        world_id: world_id.to_string(),
                        tags: tags.to_vec(),
                    })
                    .await
                    .map_err(|status| ServiceError::Rpc {
                        service: POST,
                        status,
                    })?
                    .into_inner();
                let summary = doc! {"post_id": &response.post_id, "created_at": &response.created_at};
                Ok(((response.post_id, response.created_at), summary))
            },
        )
        .await
    }
}

#[async_trait::async_trait]
impl MediaGateway for ServiceClient {
    async fn presigned_upload_url(
        &self,
        world_id: &str,
        character_id: &str,
        filename: &str,
        content_type: &str,
        size: i64,
        media_type: MediaType,
        task_id: &str,
    ) -> Result<PresignedUpload, ServiceError> {
        self.execute(
            MEDIA,
            "GetPresignedUploadURL",
            task_id,
            world_id,
            doc! {
                "world_id": world_id,
                "character_id": character_id,
                "filename": filename,
                "content_type": content_type,
                "size": size,
                "media_type": media_type.as_str_name(),
            },
            || async move {
                let channel = self.channel(MEDIA).await?;
                let mut client = MediaServiceClient::new(channel);
                let mut request = GetPresignedUploadUrlRequest {
                    world_id: world_id.to_string(),
                    character_id: character_id.to_string(),
                    filename: filename.to_string(),
                    content_type: content_type.to_string(),
                    size,
                    media_type: 0,
                };
                request.set_media_type(media_type);
                let response = client
                    .get_presigned_upload_url(request)
                    .await
                    .map_err(|status| ServiceError::Rpc {
                        service: MEDIA,
                        status,
                    })?
                    .into_inner();
                if response.media_id.is_empty() || response.upload_url.is_empty() {
                    return Err(ServiceError::Rejected {
                        service: MEDIA,
                        message: "presigned upload response is missing media_id or URL"
                            .to_string(),
                    });
                }
                let summary = doc! {
                    "media_id": &response.media_id,
                    "expires_at": response.expires_at,
                };
                Ok((
                    PresignedUpload {
                        media_id: response.media_id,
                        upload_url: response.upload_url,
                        expires_at: response.expires_at,
                    },
                    summary,
                ))
            },
        )
        .await
    }

    async fn confirm_upload(&self, media_id: &str, task_id: &str) -> Result<(), ServiceError> {
        self.execute(
            MEDIA,
            "ConfirmUpload",
            task_id,
            "",
            doc! {"media_id": media_id},
            || async move {
                let channel = self.channel(MEDIA).await?;
                let mut client = MediaServiceClient::new(channel);
                let response = client
                    .confirm_upload(ConfirmUploadRequest {
                        media_id: media_id.to_string(),
                    })
                    .await
                    .map_err(|status| ServiceError::Rpc {
                        service: MEDIA,
                        status,
                    })?
                    .into_inner();
                if !response.success {
                    return Err(ServiceError::Rejected {
                        service: MEDIA,
                        message: format!("upload of media {media_id} was not confirmed"),
                    });
                }
                Ok(((), doc! {"success": true}))
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_statuses_are_retryable() {
        let err = ServiceError::Rpc {
            service: CHARACTER,
            status: tonic::Status::unavailable("down"),
        };
        assert!(is_transient(&err));

        let err = ServiceError::Rpc {
            service: CHARACTER,
            status: tonic::Status::deadline_exceeded("slow"),
        };
        assert!(is_transient(&err));
    }

    #[test]
    fn permanent_failures_are_not_retryable() {
        let err = ServiceError::Rpc {
            service: POST,
            status: tonic::Status::invalid_argument("bad request"),
        };
        assert!(!is_transient(&err));

        let err = ServiceError::Rejected {
            service: MEDIA,
            message: "no".to_string(),
        };
        assert!(!is_transient(&err));

        let err = ServiceError::CircuitOpen(crate::net::breaker::CircuitOpen {
            name: "media_service",
        });
        assert!(!is_transient(&err));
    }

    #[test]
    fn rate_limit_status_is_not_locally_retried() {
        let err = ServiceError::Rpc {
            service: POST,
            status: tonic::Status::resource_exhausted("limit"),
        };
        assert!(!is_transient(&err));
    }
}
