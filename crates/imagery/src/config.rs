use std::net::SocketAddr;

use serde::Deserialize;

use imagery_backend_postgres::PgBackendConfig;
use imagery_core::{ResourceDefinition, UploadSettings};

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 13030))
}

#[derive(Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    /// Overrides `uploads.public_base_url` when set.
    pub public_base_url: Option<String>,
    #[serde(default)]
    pub uploads: UploadSettings,
    pub resources: Vec<ResourceDefinition>,
    pub backend: Backend,
}

impl Config {
    pub fn upload_settings(&self) -> UploadSettings {
        let mut settings = self.uploads.clone();
        if let Some(url) = &self.public_base_url {
            settings.public_base_url = url.clone();
        }
        settings
    }
}

#[derive(Clone, Deserialize)]
#[serde(tag = "type")]
pub enum Backend {
    PostgresS3(PgBackendConfig),
    /// Process-local sessions and images; nothing survives a restart.
    Memory {
        #[serde(default)]
        objects: imagery_objectstore::Config,
    },
}
