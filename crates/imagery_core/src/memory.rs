//! Process-local [`UploadSessionStore`] and [`ImageStore`].
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::content_hash::ContentHash;
use crate::image::{ImageLink, ImageObject};
use crate::owner::OwnerRef;
use crate::registry::{ImageStore, UploadSessionStore};
use crate::session::UploadSession;
use crate::{Error, Result};

#[derive(Default)]
struct State {
    sessions: HashMap<Uuid, UploadSession>,
    images: HashMap<Uuid, ImageObject>,
}

impl State {
    fn check_version(&self, session: &UploadSession) -> Result<()> {
        let stored = self
            .sessions
            .get(&session.id)
            .ok_or_else(|| Error::NotFound(format!("upload {}", session.id)))?;
        if stored.version != session.version {
            return Err(Error::Conflict(format!(
                "upload {} was modified concurrently",
                session.id
            )));
        }
        Ok(())
    }

    fn store(&mut self, session: &mut UploadSession) {
        session.version += 1;
        session.updated_at = Utc::now();
        self.sessions.insert(session.id, session.clone());
    }
}

/// Keeps sessions and images in memory behind a single lock, which makes every trait operation
/// atomic.
#[derive(Clone, Default)]
pub struct MemoryMetadata {
    state: Arc<Mutex<State>>,
}

impl MemoryMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// All images currently owned by `owner`.
    pub async fn images_of(&self, owner: &OwnerRef) -> Vec<ImageObject> {
        let state = self.state.lock().await;
        let mut images: Vec<ImageObject> = state
            .images
            .values()
            .filter(|i| i.owner == *owner)
            .cloned()
            .collect();
        images.sort_by_key(|i| i.created_at);
        images
    }
}

#[async_trait]
impl UploadSessionStore for MemoryMetadata {
    async fn insert(&self, session: &UploadSession) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.sessions.contains_key(&session.id) {
            return Err(Error::Conflict(format!("upload {} already exists", session.id)));
        }
        if let Some(hash) = &session.content_hash {
            let active = state.sessions.values().any(|s| {
                !s.status.is_terminal()
                    && s.owner == session.owner
                    && s.content_hash.as_ref() == Some(hash)
            });
            if active {
                return Err(Error::Conflict(format!(
                    "an upload for {} with content hash {hash} is already in flight",
                    session.owner,
                )));
            }
        }
        state.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn get(&self, id: &Uuid) -> Result<Option<UploadSession>> {
        Ok(self.state.lock().await.sessions.get(id).cloned())
    }

    async fn find_active(
        &self,
        owner: &OwnerRef,
        hash: &ContentHash,
    ) -> Result<Option<UploadSession>> {
        let state = self.state.lock().await;
        Ok(state
            .sessions
            .values()
            .find(|s| {
                !s.status.is_terminal() && s.owner == *owner && s.content_hash.as_ref() == Some(hash)
            })
            .cloned())
    }

    async fn update(&self, session: &mut UploadSession) -> Result<()> {
        let mut state = self.state.lock().await;
        state.check_version(session)?;
        state.store(session);
        Ok(())
    }
}

#[async_trait]
impl ImageStore for MemoryMetadata {
    async fn get(&self, id: &Uuid) -> Result<Option<ImageObject>> {
        Ok(self.state.lock().await.images.get(id).cloned())
    }

    async fn find_by_hash(
        &self,
        owner: &OwnerRef,
        hash: &ContentHash,
    ) -> Result<Option<ImageObject>> {
        let state = self.state.lock().await;
        Ok(state
            .images
            .values()
            .find(|i| i.owner == *owner && i.content_hash == *hash)
            .cloned())
    }

    async fn link(&self, session: &mut UploadSession, link: ImageLink) -> Result<ImageObject> {
        let mut state = self.state.lock().await;
        state.check_version(session)?;

        let image_id = match link {
            ImageLink::Create(image) => {
                let duplicate = state
                    .images
                    .values()
                    .any(|i| i.owner == image.owner && i.content_hash == image.content_hash);
                if duplicate {
                    return Err(Error::Conflict(format!(
                        "{} already has an image with content {}",
                        image.owner, image.content_hash,
                    )));
                }
                let id = image.id;
                state.images.insert(id, image);
                id
            }
            ImageLink::Repoint {
                image_id,
                storage_key,
            } => {
                let image = state
                    .images
                    .get_mut(&image_id)
                    .ok_or_else(|| Error::NotFound(format!("image {image_id}")))?;
                image.storage_key = storage_key;
                image_id
            }
        };

        let owner = session.owner.clone();
        let has_primary = state
            .images
            .values()
            .any(|i| i.owner == owner && i.is_primary);

        let image = state
            .images
            .get_mut(&image_id)
            .ok_or_else(|| Error::NotFound(format!("image {image_id}")))?;
        if !has_primary {
            image.is_primary = true;
        }
        let image = image.clone();

        state.store(session);
        Ok(image)
    }
}
