use chrono::{DateTime, Utc};
use imagery_objectstore::{Chunk, Key};
use serde::Serialize;
use uuid::Uuid;

use crate::content_hash::ContentHash;
use crate::content_type::ImageContentType;
use crate::owner::OwnerRef;
use crate::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Status only ever moves forward; terminal states accept nothing.
    pub fn can_transition_to(&self, next: UploadStatus) -> bool {
        use UploadStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress) | (Pending, Failed) | (InProgress, Completed) | (InProgress, Failed)
        )
    }
}

impl TryFrom<&str> for UploadStatus {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(Error::InvalidArgument(format!("unknown upload status: {s}"))),
        }
    }
}

/// Which front door created a session. Each protocol only accepts bytes for its own sessions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadProtocol {
    Parts,
    Tus,
}

impl UploadProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parts => "parts",
            Self::Tus => "tus",
        }
    }
}

impl TryFrom<&str> for UploadProtocol {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        match s {
            "parts" => Ok(Self::Parts),
            "tus" => Ok(Self::Tus),
            _ => Err(Error::InvalidArgument(format!("unknown upload protocol: {s}"))),
        }
    }
}

/// Durable state of one in-flight upload, including bytes not yet forwarded to the object store.
///
/// `current_part_index` counts accepted appends while `part_number` counts backend parts
/// actually uploaded; the two diverge whenever buffering defers a flush. Outside of a flush in
/// progress `parts.len() == part_number - 1` holds.
#[derive(Clone, Debug)]
pub struct UploadSession {
    pub id: Uuid,
    pub owner: OwnerRef,
    pub protocol: UploadProtocol,
    pub status: UploadStatus,
    pub content_type: ImageContentType,
    pub content_hash: Option<ContentHash>,

    pub current_part_index: i64,
    pub part_number: i32,
    pub parts: Vec<Chunk>,
    pub buffered: Vec<u8>,
    pub received_bytes: i64,
    pub upload_length: Option<i64>,

    pub upload_id: String,
    pub storage_key: String,
    /// Set once the backend has assembled the parts into one object. The backend upload id is
    /// spent from then on; completion resumes from the read-back.
    pub assembled: bool,

    pub total_parts: Option<i32>,
    pub image_id: Option<Uuid>,

    /// Optimistic concurrency token; every persisted update must present the stored value.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UploadSession {
    pub fn new(
        id: Uuid,
        owner: OwnerRef,
        protocol: UploadProtocol,
        content_type: ImageContentType,
        content_hash: Option<ContentHash>,
        storage_key: &Key,
        upload_id: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            owner,
            protocol,
            status: UploadStatus::Pending,
            content_type,
            content_hash,
            current_part_index: 0,
            part_number: 1,
            parts: Vec::new(),
            buffered: Vec::new(),
            received_bytes: 0,
            upload_length: None,
            upload_id,
            storage_key: String::from(storage_key),
            assembled: false,
            total_parts: None,
            image_id: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[inline]
    pub fn buffered_bytes(&self) -> u64 {
        self.buffered.len() as u64
    }

    pub fn key(&self) -> Result<Key> {
        Key::try_from(self.storage_key.as_str()).map_err(|e| {
            Error::BackendError(format!("stored key {:?} is invalid: {e}", self.storage_key).into())
        })
    }

    pub fn transition(&mut self, next: UploadStatus) -> Result<()> {
        if self.status == next {
            return Ok(());
        }
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidState(format!(
                "upload {} cannot move from {} to {}",
                self.id,
                self.status.as_str(),
                next.as_str(),
            )));
        }
        self.status = next;
        Ok(())
    }

    pub(crate) fn ensure_appendable(&self, protocol: UploadProtocol) -> Result<()> {
        if self.protocol != protocol {
            return Err(Error::InvalidState(format!(
                "upload {} was created through the {} protocol",
                self.id,
                self.protocol.as_str(),
            )));
        }
        if self.assembled {
            return Err(Error::InvalidState(format!(
                "upload {} is already assembled and accepts no more bytes",
                self.id,
            )));
        }
        match self.status {
            UploadStatus::Pending | UploadStatus::InProgress => Ok(()),
            s => Err(Error::InvalidState(format!(
                "upload {} is {} and accepts no more bytes",
                self.id,
                s.as_str(),
            ))),
        }
    }

    /// Record the linked image and drop all buffering and part bookkeeping.
    pub(crate) fn complete(&mut self, image_id: Uuid) -> Result<()> {
        self.transition(UploadStatus::Completed)?;
        self.total_parts = Some(self.parts.len() as i32);
        self.image_id = Some(image_id);
        self.buffered.clear();
        self.parts.clear();
        Ok(())
    }
}
