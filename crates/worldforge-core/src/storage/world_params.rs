//! World parameters: written once by the description workflow, read by every
//! downstream workflow when it assembles prompts.

use mongodb::bson::{doc, DateTime};

use super::models::WorldParameters;
use super::Storage;
use crate::error::StorageError;
use crate::schemas::world_description::WorldDescriptionResponse;

impl Storage {
    /// Upsert the generated parameters for a world.
    ///
    /// Re-runs of the description workflow overwrite rather than fail, so a
    /// retried task converges instead of wedging the pipeline.
    pub async fn save_world_parameters(
        &self,
        world_id: &str,
        world: &WorldDescriptionResponse,
    ) -> Result<(), StorageError> {
        let _permit = self.permit().await;
        let now = DateTime::now();
        let existing = self
            .params_collection()
            .find_one(doc! {"_id": world_id})
            .await?;

        let document = WorldParameters {
            id: world_id.to_string(),
            world: world.clone(),
            created_at: existing.as_ref().map_or(now, |e| e.created_at),
            updated_at: now,
        };

        if existing.is_some() {
            let replacement = mongodb::bson::to_document(&document)?;
            self.params_collection()
                .update_one(doc! {"_id": world_id}, doc! {"$set": replacement})
                .await?;
            tracing::info!(world_id, "updated world parameters");
        } else {
            self.params_collection().insert_one(&document).await?;
            tracing::info!(world_id, "created world parameters");
        }
        Ok(())
    }

    pub async fn get_world_parameters(
        &self,
        world_id: &str,
    ) -> Result<Option<WorldParameters>, StorageError> {
        let _permit = self.permit().await;
        Ok(self
            .params_collection()
            .find_one(doc! {"_id": world_id})
            .await?)
    }
}
