//! Finalize-and-link: the single completion routine behind both front doors.
use chrono::Utc;
use futures::stream::TryStreamExt;
use imagery_objectstore::Key;
use uuid::Uuid;

use crate::content_hash::ContentHash;
use crate::image::{ImageLink, ImageObject};
use crate::session::{UploadSession, UploadStatus};
use crate::uploads::{CompletedUpload, Uploads};
use crate::{Error, Result};

impl Uploads {
    /// Flush the remaining buffer, assemble the backend object, verify its hash against the
    /// declared one (when declared), deduplicate, link and assign a primary image.
    ///
    /// Object store failures before assembly return [`Error::Unavailable`] and leave the stored
    /// session untouched. Once assembled the session records it, so a retry after a failed
    /// read-back or link goes straight to verification. Integrity and duplicate-content
    /// failures mark the session failed and delete the assembled object.
    pub(crate) async fn complete_session(
        &self,
        mut session: UploadSession,
        target: Option<ImageObject>,
    ) -> Result<CompletedUpload> {
        let key = session.key()?;

        if !session.assembled {
            self.assemble(&mut session, &key).await?;
        }

        let computed = self.digest_object(&key).await?;

        if let Some(declared) = session.content_hash.clone() {
            if declared != computed {
                tracing::warn!(
                    upload = %session.id,
                    declared = %declared,
                    computed = %computed,
                    "assembled object does not match declared content hash",
                );
                self.fail(session).await;
                self.discard(&key).await;
                return Err(Error::IntegrityError { declared, computed });
            }
        }

        let link = match target {
            Some(image) => {
                if image.content_hash != computed {
                    let msg = format!(
                        "image {} holds content {} but the upload produced {computed}",
                        image.id, image.content_hash,
                    );
                    self.fail(session).await;
                    return Err(Error::Conflict(msg));
                }
                ImageLink::Repoint {
                    image_id: image.id,
                    storage_key: session.storage_key.clone(),
                }
            }
            None => {
                if let Some(existing) = self.images.find_by_hash(&session.owner, &computed).await? {
                    let msg = format!(
                        "{} already has image {} with content {computed}",
                        session.owner, existing.id,
                    );
                    // a concurrent retry of this session may already have linked the object
                    let linked_here = existing.storage_key == session.storage_key;
                    self.fail(session).await;
                    if !linked_here {
                        self.discard(&key).await;
                    }
                    return Err(Error::Conflict(msg));
                }
                ImageLink::Create(ImageObject {
                    id: Uuid::new_v4(),
                    owner: session.owner.clone(),
                    storage_key: session.storage_key.clone(),
                    content_hash: computed.clone(),
                    is_primary: false,
                    created_at: Utc::now(),
                })
            }
        };

        let mut completed = session.clone();
        completed.complete(link.image_id())?;

        match self.images.link(&mut completed, link).await {
            Ok(image) => {
                tracing::info!(
                    upload = %completed.id,
                    image = %image.id,
                    primary = image.is_primary,
                    parts = completed.total_parts.unwrap_or_default(),
                    "linked uploaded image",
                );
                Ok(CompletedUpload {
                    url: self.settings.image_url(&image.storage_key),
                    image,
                    session: completed,
                })
            }
            Err(Error::Conflict(msg)) => {
                self.fail(session).await;
                Err(Error::Conflict(msg))
            }
            Err(e) => Err(e),
        }
    }

    /// Flush the tail and assemble the backend object, then persist that fact. Assembly spends
    /// the backend upload id, so a later retry must not repeat it.
    async fn assemble(&self, session: &mut UploadSession, key: &Key) -> Result<()> {
        let mut assembled = session.clone();
        if !assembled.buffered.is_empty() {
            self.flush(&mut assembled, key).await?;
        }

        self.objects
            .finalize_chunked_upload(&assembled.upload_id, key, assembled.parts.clone())
            .await?;

        assembled.assembled = true;
        self.sessions.update(&mut assembled).await?;
        tracing::debug!(
            upload = %assembled.id,
            parts = assembled.parts.len(),
            "assembled backend object",
        );
        *session = assembled;
        Ok(())
    }

    async fn digest_object(&self, key: &Key) -> Result<ContentHash> {
        let mut body = self.objects.get(key).await?;
        let mut digester = ContentHash::digester();
        while let Some(bytes) = body.try_next().await? {
            digester.update(&bytes);
        }
        tracing::debug!(key = %key, bytes = digester.bytes(), "digested assembled object");
        Ok(digester.finalize())
    }

    /// Delete an assembled object no image will point at. Failures are only logged, the object
    /// is unreachable either way.
    async fn discard(&self, key: &Key) {
        if let Err(e) = self.objects.delete(key).await {
            tracing::warn!(key = %key, "failed to delete rejected object: {e}");
        }
    }

    /// Mark `session` failed. The original error is what the caller reports, so a failure to
    /// persist here is only logged.
    async fn fail(&self, mut session: UploadSession) {
        if let Err(e) = session.transition(UploadStatus::Failed) {
            tracing::warn!(upload = %session.id, "cannot mark upload failed: {e}");
            return;
        }
        if let Err(e) = self.sessions.update(&mut session).await {
            tracing::warn!(upload = %session.id, "failed to persist failed upload: {e}");
        }
    }
}
