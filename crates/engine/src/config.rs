use std::time::Duration;

use serde::Deserialize;

use docgraph_core::RecordId;

/// Engine settings. `user_id` and `space_id` have no meaningful default.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EngineConfig {
    pub user_id: RecordId,
    pub space_id: RecordId,
    #[serde(default)]
    pub shard_id: u64,
    /// Milliseconds to wait before each remote call.
    #[serde(default = "default_request_interval_ms")]
    pub request_interval_ms: u64,
    #[serde(default = "default_true")]
    pub refresh_after_write: bool,
    #[serde(default = "default_column_width")]
    pub default_column_width: u32,
    #[serde(default = "default_embed_page_width")]
    pub embed_page_width: u32,
}

fn default_request_interval_ms() -> u64 {
    500
}

fn default_true() -> bool {
    true
}

fn default_column_width() -> u32 {
    250
}

fn default_embed_page_width() -> u32 {
    500
}

impl EngineConfig {
    pub fn new(user_id: impl Into<RecordId>, space_id: impl Into<RecordId>) -> Self {
        Self {
            user_id: user_id.into(),
            space_id: space_id.into(),
            shard_id: 0,
            request_interval_ms: default_request_interval_ms(),
            refresh_after_write: default_true(),
            default_column_width: default_column_width(),
            embed_page_width: default_embed_page_width(),
        }
    }

    pub fn request_interval(&self) -> Duration {
        Duration::from_millis(self.request_interval_ms)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
