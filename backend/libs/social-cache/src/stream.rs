//! Image-processing task stream
//!
//! Uploads append a task to a capped stream that the image worker consumes.
//! The stream is approximately trimmed so a stalled worker cannot grow it
//! without bound.

use crate::store::CacheStore;
use crate::{CacheKey, CacheResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Approximate maximum number of retained tasks
pub const IMAGE_STREAM_MAX_LEN: usize = 5000;

/// One image to post-process (thumbnails, moderation)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageTask {
    pub content_id: String,
    pub author_id: String,
    pub object_key: String,
    pub kind: String,
}

impl ImageTask {
    fn fields(&self) -> Vec<(String, String)> {
        vec![
            ("content_id".to_string(), self.content_id.clone()),
            ("author_id".to_string(), self.author_id.clone()),
            ("object_key".to_string(), self.object_key.clone()),
            ("kind".to_string(), self.kind.clone()),
        ]
    }
}

#[derive(Clone)]
pub struct ImageTaskQueue {
    store: Arc<dyn CacheStore>,
    max_len: usize,
}

impl ImageTaskQueue {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            max_len: IMAGE_STREAM_MAX_LEN,
        }
    }

    /// Append a task; returns the stream entry id
    pub async fn publish(&self, task: &ImageTask) -> CacheResult<String> {
        let id = self
            .store
            .xadd_capped(&CacheKey::image_task_stream(), self.max_len, &task.fields())
            .await?;
        info!(entry_id = %id, content_id = %task.content_id, "Image task queued");
        Ok(id)
    }
}
