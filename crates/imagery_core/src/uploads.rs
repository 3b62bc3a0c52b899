use std::sync::Arc;

use bytes::Bytes;
use imagery_objectstore::{Key, ObjectStore};
use uuid::Uuid;

use crate::content_hash::ContentHash;
use crate::content_type::ImageContentType;
use crate::image::ImageObject;
use crate::key::KeyStrategy;
use crate::owner::OwnerRef;
use crate::registry::{ImageStore, UploadSessionStore};
use crate::session::{UploadProtocol, UploadSession, UploadStatus};
use crate::settings::UploadSettings;
use crate::{Error, Result};

/// Result of a successful completion through either front door.
#[derive(Clone, Debug)]
pub struct CompletedUpload {
    pub image: ImageObject,
    pub url: String,
    pub session: UploadSession,
}

/// Coordinates upload sessions from initiation to a linked [`ImageObject`].
///
/// Holds no per-session state of its own: every operation loads the session, works on a local
/// copy and persists it through the [`UploadSessionStore`] with an optimistic version check, so
/// any number of instances may serve the same session.
#[derive(Clone)]
pub struct Uploads {
    pub(crate) sessions: Arc<dyn UploadSessionStore>,
    pub(crate) images: Arc<dyn ImageStore>,
    pub(crate) objects: Arc<dyn ObjectStore>,
    pub(crate) keys: Arc<dyn KeyStrategy>,
    pub(crate) settings: UploadSettings,
}

impl Uploads {
    pub fn new(
        sessions: Arc<dyn UploadSessionStore>,
        images: Arc<dyn ImageStore>,
        objects: Arc<dyn ObjectStore>,
        keys: Arc<dyn KeyStrategy>,
        settings: UploadSettings,
    ) -> Result<Self> {
        if settings.flush_threshold == 0 {
            return Err(Error::Configuration(String::from(
                "uploads.flush_threshold must be greater than zero",
            )));
        }
        if settings.flush_threshold < objects.min_part_size() {
            return Err(Error::Configuration(format!(
                "uploads.flush_threshold ({}) is below the object store's minimum part size ({})",
                settings.flush_threshold,
                objects.min_part_size(),
            )));
        }
        Ok(Self {
            sessions,
            images,
            objects,
            keys,
            settings,
        })
    }

    pub fn settings(&self) -> &UploadSettings {
        &self.settings
    }

    /// Open a new session for `owner` along with its backend multipart object.
    pub async fn initiate(
        &self,
        owner: &OwnerRef,
        content_type: &str,
        content_hash: &str,
    ) -> Result<UploadSession> {
        let content_type = ImageContentType::try_from(content_type)?;
        let content_hash = ContentHash::try_from(content_hash)?;

        self.open_session(owner, UploadProtocol::Parts, content_type, Some(content_hash), None)
            .await
    }

    /// Accept the chunk at `part_index` into the session's buffer, flushing a backend part when
    /// the buffer reaches the flush threshold.
    pub async fn append(
        &self,
        owner: &OwnerRef,
        session_id: &Uuid,
        part_index: i64,
        chunk: Bytes,
    ) -> Result<UploadSession> {
        let session = self.load(owner, session_id).await?;
        session.ensure_appendable(UploadProtocol::Parts)?;

        if part_index != session.current_part_index {
            return Err(Error::InvalidArgument(format!(
                "expected part index {}, got {part_index}",
                session.current_part_index,
            )));
        }
        if chunk.is_empty() {
            return Err(Error::InvalidArgument(String::from("chunk must not be empty")));
        }
        if chunk.len() as u64 > self.settings.max_chunk_size {
            return Err(Error::InvalidArgument(format!(
                "chunk of {} bytes exceeds the {} byte limit",
                chunk.len(),
                self.settings.max_chunk_size,
            )));
        }

        self.accept(session, &chunk).await
    }

    /// Assemble, verify and link a session's bytes.
    ///
    /// When `target` names an existing image of the same owner, that image is re-pointed at the
    /// new bytes instead of a new image being created.
    pub async fn complete(
        &self,
        owner: &OwnerRef,
        session_id: &Uuid,
        target: Option<Uuid>,
    ) -> Result<CompletedUpload> {
        let session = self.load(owner, session_id).await?;
        if session.protocol != UploadProtocol::Parts {
            return Err(Error::InvalidState(format!(
                "upload {} completes automatically once all bytes arrive",
                session.id,
            )));
        }
        match session.status {
            UploadStatus::InProgress => {}
            UploadStatus::Pending => {
                return Err(Error::InvalidState(format!(
                    "upload {} has no appended bytes",
                    session.id,
                )))
            }
            s => {
                return Err(Error::InvalidState(format!(
                    "upload {} is already {}",
                    session.id,
                    s.as_str(),
                )))
            }
        }

        let target = match target {
            Some(image_id) => Some(
                self.images
                    .get(&image_id)
                    .await?
                    .filter(|image| image.owner == *owner)
                    .ok_or_else(|| Error::NotFound(format!("image {image_id}")))?,
            ),
            None => None,
        };

        self.complete_session(session, target).await
    }

    pub async fn status(&self, owner: &OwnerRef, session_id: &Uuid) -> Result<UploadSession> {
        self.load(owner, session_id).await
    }

    pub(crate) async fn load(&self, owner: &OwnerRef, session_id: &Uuid) -> Result<UploadSession> {
        self.sessions
            .get(session_id)
            .await?
            .filter(|s| s.owner == *owner)
            .ok_or_else(|| Error::NotFound(format!("upload {session_id}")))
    }

    pub(crate) async fn open_session(
        &self,
        owner: &OwnerRef,
        protocol: UploadProtocol,
        content_type: ImageContentType,
        content_hash: Option<ContentHash>,
        upload_length: Option<i64>,
    ) -> Result<UploadSession> {
        if let Some(hash) = &content_hash {
            if let Some(active) = self.sessions.find_active(owner, hash).await? {
                return Err(Error::Conflict(format!(
                    "upload {} for {owner} is already in flight with content hash {hash}",
                    active.id,
                )));
            }
        }

        let id = Uuid::new_v4();
        let key = self.keys.object_key(owner, &id, content_type)?;
        let upload_id = self.objects.initiate_chunked_upload(&key).await?;

        let mut session = UploadSession::new(
            id,
            owner.clone(),
            protocol,
            content_type,
            content_hash,
            &key,
            upload_id,
        );
        session.upload_length = upload_length;

        if let Err(e) = self.sessions.insert(&session).await {
            if let Err(abort_err) = self
                .objects
                .abort_chunked_upload(&session.upload_id, &key)
                .await
            {
                tracing::warn!(
                    upload = %session.id,
                    "failed to abort multipart upload after session insert failed: {abort_err}"
                );
            }
            return Err(e);
        }

        tracing::info!(
            upload = %session.id,
            owner = %owner,
            protocol = protocol.as_str(),
            key = %session.storage_key,
            "opened upload session",
        );
        Ok(session)
    }

    /// Buffer `chunk`, flush if the threshold is reached, advance the counters and persist.
    ///
    /// `session` is consumed so that a failed flush or persist leaves nothing behind but the
    /// previously stored state.
    pub(crate) async fn accept(
        &self,
        mut session: UploadSession,
        chunk: &[u8],
    ) -> Result<UploadSession> {
        session.buffered.extend_from_slice(chunk);
        if session.buffered_bytes() >= self.settings.flush_threshold {
            let key = session.key()?;
            self.flush(&mut session, &key).await?;
        }

        session.current_part_index += 1;
        session.received_bytes += chunk.len() as i64;
        session.transition(UploadStatus::InProgress)?;

        self.sessions.update(&mut session).await?;

        tracing::debug!(
            upload = %session.id,
            part_index = session.current_part_index,
            buffered = session.buffered_bytes(),
            received = session.received_bytes,
            "accepted chunk",
        );
        Ok(session)
    }

    /// Forward the whole buffer as the next backend part.
    pub(crate) async fn flush(&self, session: &mut UploadSession, key: &Key) -> Result<()> {
        let body = Bytes::from(std::mem::take(&mut session.buffered));
        let size = body.len();
        let chunk = self
            .objects
            .upload_chunk(&session.upload_id, key, session.part_number, body)
            .await?;

        tracing::debug!(
            upload = %session.id,
            part_number = chunk.chunk_number,
            size,
            "flushed part",
        );
        session.parts.push(chunk);
        session.part_number += 1;
        Ok(())
    }
}
