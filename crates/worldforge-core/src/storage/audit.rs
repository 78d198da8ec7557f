//! Append-only audit log of every external API call.
//!
//! Auditing is best-effort: a failed insert is logged and swallowed so a
//! flaky audit collection can never fail a generation step.

use super::models::ApiRequestHistory;
use super::Storage;

impl Storage {
    /// Append one request record.
    pub async fn log_api_request(&self, entry: ApiRequestHistory) {
        let _permit = self.permit().await;
        if let Err(err) = self.history_collection().insert_one(&entry).await {
            tracing::warn!(
                request_type = %entry.request_type,
                task_id = %entry.task_id,
                error = %err,
                "failed to record API request history",
            );
        }
    }
}
