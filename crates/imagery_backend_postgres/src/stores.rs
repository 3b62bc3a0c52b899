use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use imagery_core::registry::{ImageStore, UploadSessionStore};
use imagery_core::{ContentHash, ImageLink, ImageObject, OwnerRef, Result, UploadSession};

use super::errors::Error;
use super::metadata::PostgresMetadataPool;

/// Postgres-backed [`UploadSessionStore`] and [`ImageStore`].
#[derive(Clone)]
pub struct PgMetadata {
    metadata: PostgresMetadataPool,
}

impl PgMetadata {
    pub fn new(metadata: PostgresMetadataPool) -> Self {
        Self { metadata }
    }
}

#[async_trait]
impl UploadSessionStore for PgMetadata {
    async fn insert(&self, session: &UploadSession) -> Result<()> {
        let mut tx = self.metadata.get_tx().await?;
        tx.insert_session(session).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, id: &Uuid) -> Result<Option<UploadSession>> {
        Ok(self.metadata.get_conn().await?.get_session(id).await?)
    }

    async fn find_active(
        &self,
        owner: &OwnerRef,
        hash: &ContentHash,
    ) -> Result<Option<UploadSession>> {
        Ok(self
            .metadata
            .get_conn()
            .await?
            .find_active_session(owner, hash)
            .await?)
    }

    async fn update(&self, session: &mut UploadSession) -> Result<()> {
        let now = Utc::now();
        let mut tx = self.metadata.get_tx().await?;
        tx.update_session(session, now).await?;
        tx.commit().await?;

        session.version += 1;
        session.updated_at = now;
        Ok(())
    }
}

#[async_trait]
impl ImageStore for PgMetadata {
    async fn get(&self, id: &Uuid) -> Result<Option<ImageObject>> {
        Ok(self.metadata.get_conn().await?.get_image(id).await?)
    }

    async fn find_by_hash(
        &self,
        owner: &OwnerRef,
        hash: &ContentHash,
    ) -> Result<Option<ImageObject>> {
        Ok(self
            .metadata
            .get_conn()
            .await?
            .find_image_by_hash(owner, hash)
            .await?)
    }

    async fn link(&self, session: &mut UploadSession, link: ImageLink) -> Result<ImageObject> {
        let now = Utc::now();
        let mut tx = self.metadata.get_tx().await?;

        // the session write doubles as the version check for the whole link
        tx.update_session(session, now).await?;

        let image_id = link.image_id();
        match link {
            ImageLink::Create(image) => tx.insert_image(&image).await?,
            ImageLink::Repoint {
                image_id,
                storage_key,
            } => tx.repoint_image(&image_id, &storage_key).await?,
        }
        tx.claim_primary(&session.owner, &image_id).await?;

        let image = tx
            .get_image(&image_id)
            .await?
            .ok_or(Error::MissingImage(image_id))?;
        tx.commit().await?;

        session.version += 1;
        session.updated_at = now;
        Ok(image)
    }
}
