use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::content_hash::ContentHash;
use crate::owner::OwnerRef;

/// An image linked into the domain model.
///
/// At most one image per owner carries a given [`ContentHash`], and at most one per owner is
/// primary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageObject {
    pub id: Uuid,
    pub owner: OwnerRef,
    pub storage_key: String,
    pub content_hash: ContentHash,
    pub is_primary: bool,
    pub created_at: DateTime<Utc>,
}

/// How a completed upload becomes an [`ImageObject`].
#[derive(Clone, Debug)]
pub enum ImageLink {
    /// Insert a brand new image.
    Create(ImageObject),
    /// Point an existing image, already verified to carry the same hash, at new bytes.
    Repoint { image_id: Uuid, storage_key: String },
}

impl ImageLink {
    pub fn image_id(&self) -> Uuid {
        match self {
            Self::Create(image) => image.id,
            Self::Repoint { image_id, .. } => *image_id,
        }
    }
}
