use std::sync::Arc;

use serde::Deserialize;

use super::ObjectStore;
use super::Result;

/// Selects and configures the backend object store.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type")]
pub enum Config {
    S3(super::s3::S3Config),
    Memory(super::memory::MemoryConfig),
}

impl Default for Config {
    fn default() -> Self {
        Self::Memory(Default::default())
    }
}

impl Config {
    pub async fn new_objects(&self) -> Result<Arc<dyn ObjectStore>> {
        match self {
            Self::S3(cfg) => Ok(Arc::new(cfg.new_objects().await?)),
            Self::Memory(cfg) => Ok(Arc::new(cfg.new_objects())),
        }
    }
}
