//! Core semantics of the tus 1.0.0 front door: creation, byte-offset appends and offset queries.
//!
//! Bytes sent with a PATCH are re-chunked to the flush threshold and fed through the same
//! buffer/flush path as explicit appends, one persisted step per chunk. Reaching the declared
//! upload length runs the shared completion routine.
use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use uuid::Uuid;

use crate::content_hash::ContentHash;
use crate::content_type::ImageContentType;
use crate::owner::OwnerRef;
use crate::session::{UploadProtocol, UploadSession, UploadStatus};
use crate::stream::ChunkedBody;
use crate::uploads::{CompletedUpload, Uploads};
use crate::{Error, Result};

/// Parameters of a tus creation request.
#[derive(Clone, Debug, Default)]
pub struct TusCreate {
    pub upload_length: u64,
    pub content_type: Option<String>,
    pub content_hash: Option<String>,
}

/// Outcome of a tus PATCH.
#[derive(Clone, Debug)]
pub struct TusProgress {
    pub offset: u64,
    pub completed: Option<CompletedUpload>,
}

impl Uploads {
    pub async fn tus_create(&self, owner: &OwnerRef, req: TusCreate) -> Result<UploadSession> {
        if req.upload_length == 0 {
            return Err(Error::InvalidArgument(String::from(
                "Upload-Length must be greater than zero",
            )));
        }
        if req.upload_length > self.settings.tus_max_size {
            return Err(Error::InvalidArgument(format!(
                "Upload-Length {} exceeds the maximum of {}",
                req.upload_length, self.settings.tus_max_size,
            )));
        }
        let content_type = req
            .content_type
            .as_deref()
            .ok_or_else(|| Error::InvalidArgument(String::from("filetype metadata is required")))
            .and_then(|t| ImageContentType::try_from(t))?;
        let content_hash = req
            .content_hash
            .as_deref()
            .map(|h| ContentHash::try_from(h))
            .transpose()?;

        // duplicate content is known before any byte is sent
        if let Some(hash) = &content_hash {
            if let Some(existing) = self.images.find_by_hash(owner, hash).await? {
                return Err(Error::Conflict(format!(
                    "{owner} already has image {} with content {hash}",
                    existing.id,
                )));
            }
        }

        self.open_session(
            owner,
            UploadProtocol::Tus,
            content_type,
            content_hash,
            Some(req.upload_length as i64),
        )
        .await
    }

    pub async fn tus_offset(&self, owner: &OwnerRef, session_id: &Uuid) -> Result<UploadSession> {
        self.load(owner, session_id)
            .await?
            .into_protocol(UploadProtocol::Tus)
    }

    /// Append `body` at `offset`. Progress is persisted per chunk, so a body that fails midway
    /// still advances the offset by everything accepted before the failure. A PATCH at the
    /// declared length with an empty body retries a completion that failed after assembly.
    pub async fn tus_patch<S, E>(
        &self,
        owner: &OwnerRef,
        session_id: &Uuid,
        offset: u64,
        body: S,
    ) -> Result<TusProgress>
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Send,
        E: std::fmt::Display + Send,
    {
        let mut session = self.tus_offset(owner, session_id).await?;
        // an assembled session only needs its completion retried, by a PATCH at the final offset
        if !(session.assembled && session.status == UploadStatus::InProgress) {
            session.ensure_appendable(UploadProtocol::Tus)?;
        }

        let received = session.received_bytes as u64;
        if offset != received {
            return Err(Error::Conflict(format!(
                "Upload-Offset {offset} does not match current offset {received}"
            )));
        }
        let length = session.upload_length.ok_or_else(|| {
            Error::InvalidState(format!("upload {} has no declared length", session.id))
        })? as u64;

        let chunked = ChunkedBody::new(body, self.settings.flush_threshold as usize);
        futures::pin_mut!(chunked);

        while let Some(piece) = chunked.next().await {
            let piece = piece.map_err(|e| {
                Error::InvalidArgument(format!("failed reading upload body: {e}"))
            })?;
            if session.received_bytes as u64 + piece.len() as u64 > length {
                return Err(Error::InvalidArgument(format!(
                    "body exceeds Upload-Length {length}"
                )));
            }
            session = self.accept(session, &piece).await?;
        }

        let offset = session.received_bytes as u64;
        if offset < length {
            return Ok(TusProgress {
                offset,
                completed: None,
            });
        }

        let completed = self.complete_session(session, None).await?;
        Ok(TusProgress {
            offset,
            completed: Some(completed),
        })
    }
}

impl UploadSession {
    fn into_protocol(self, protocol: UploadProtocol) -> Result<UploadSession> {
        if self.protocol != protocol {
            return Err(Error::NotFound(format!("{} upload {}", protocol.as_str(), self.id)));
        }
        Ok(self)
    }
}
