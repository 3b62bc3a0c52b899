use std::sync::Arc;

use serde::Deserialize;

use imagery_core::ResourceDefinition;
use imagery_objectstore::{ObjectStore, S3Config};

use super::errors::Result;
use super::metadata::PostgresConfig;
use super::owners::PgOwnerResolver;
use super::stores::PgMetadata;

#[derive(Clone, Debug, Deserialize)]
pub struct PgBackendConfig {
    postgres: PostgresConfig,
    s3: S3Config,
}

impl PgBackendConfig {
    pub async fn get_backend(&self, resources: &[ResourceDefinition]) -> Result<PgBackend> {
        let pool = self.postgres.new_metadata().await?;
        Ok(PgBackend {
            metadata: PgMetadata::new(pool.clone()),
            owners: PgOwnerResolver::new(pool, resources),
            objects: Arc::new(self.s3.new_objects().await?),
        })
    }
}

/// Everything the upload pipeline needs from a Postgres deployment.
#[derive(Clone)]
pub struct PgBackend {
    pub metadata: PgMetadata,
    pub owners: PgOwnerResolver,
    pub objects: Arc<dyn ObjectStore>,
}
