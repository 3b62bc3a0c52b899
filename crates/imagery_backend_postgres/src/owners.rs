use std::collections::HashMap;

use async_trait::async_trait;

use imagery_core::{Error, OwnerRef, OwnerResolver, ResourceDefinition, Result};

use super::metadata::PostgresMetadataPool;

/// Resolves owners against the tables named by configured [`ResourceDefinition`]s.
///
/// Kinds without a `table` accept any non-empty id.
#[derive(Clone)]
pub struct PgOwnerResolver {
    metadata: PostgresMetadataPool,
    resources: HashMap<String, ResourceDefinition>,
}

impl PgOwnerResolver {
    pub fn new(metadata: PostgresMetadataPool, resources: &[ResourceDefinition]) -> Self {
        Self {
            metadata,
            resources: resources
                .iter()
                .map(|r| (r.kind.clone(), r.clone()))
                .collect(),
        }
    }
}

#[async_trait]
impl OwnerResolver for PgOwnerResolver {
    async fn resolve(&self, kind: &str, id: &str) -> Result<OwnerRef> {
        let not_found = || Error::NotFound(format!("resource {kind}/{id}"));

        let resource = self.resources.get(kind).ok_or_else(not_found)?;
        if id.is_empty() {
            return Err(not_found());
        }

        if let Some(table) = &resource.table {
            let exists = self
                .metadata
                .get_conn()
                .await?
                .resource_exists(table, &resource.id_column, id)
                .await?;
            if !exists {
                return Err(not_found());
            }
        }

        Ok(OwnerRef::new(kind, id))
    }
}
