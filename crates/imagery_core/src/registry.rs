//! # Storage Abstractions
//!
//! Defines the interoperability layer between [`crate::Uploads`] and metadata backend
//! implementations. Bulk bytes never pass through these traits except for the per-session
//! buffer, which lives here so that an append can be retried against any server instance or
//! after a restart.
//!
//! ## Known Implementations
//!
//! ### imagery_backend_postgres
//!
//! Sessions, their backend parts and images live in Postgres; session updates and image linking
//! each run in a single transaction.
//!
//! ### [`crate::memory::MemoryMetadata`]
//!
//! Process-local maps behind one lock. Suitable for development and tests only.
use async_trait::async_trait;
use uuid::Uuid;

use crate::content_hash::ContentHash;
use crate::image::{ImageLink, ImageObject};
use crate::owner::OwnerRef;
use crate::session::UploadSession;
use crate::Result;

/// Durable record of upload sessions.
#[async_trait]
pub trait UploadSessionStore: Send + Sync + 'static {
    /// Persist a newly created session.
    ///
    /// Must fail with [`crate::Error::Conflict`] when another non-terminal session already
    /// declares the same (owner, content hash).
    async fn insert(&self, session: &UploadSession) -> Result<()>;

    async fn get(&self, id: &Uuid) -> Result<Option<UploadSession>>;

    /// Find a pending or in-progress session declaring `hash` for `owner`.
    async fn find_active(
        &self,
        owner: &OwnerRef,
        hash: &ContentHash,
    ) -> Result<Option<UploadSession>>;

    /// Persist every mutable field of `session`, parts and buffer included.
    ///
    /// The write only succeeds if the stored version equals `session.version`; on success the
    /// version is incremented in both the store and `session`. A stale version fails with
    /// [`crate::Error::Conflict`] and writes nothing.
    async fn update(&self, session: &mut UploadSession) -> Result<()>;
}

/// Access to images linked into the domain model.
#[async_trait]
pub trait ImageStore: Send + Sync + 'static {
    async fn get(&self, id: &Uuid) -> Result<Option<ImageObject>>;

    async fn find_by_hash(
        &self,
        owner: &OwnerRef,
        hash: &ContentHash,
    ) -> Result<Option<ImageObject>>;

    /// Apply `link`, make the image primary if its owner has none, and persist `session`
    /// (already marked completed) as one atomic step.
    ///
    /// Fails with [`crate::Error::Conflict`] when creating would duplicate (owner, content
    /// hash) or when `session.version` is stale; nothing is written in either case.
    async fn link(&self, session: &mut UploadSession, link: ImageLink) -> Result<ImageObject>;
}
