use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Reference to the domain record an upload or image belongs to, eg `users/42`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct OwnerRef {
    pub kind: String,
    pub id: String,
}

impl OwnerRef {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }
}

impl std::fmt::Display for OwnerRef {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

fn default_id_column() -> String {
    String::from("id")
}

/// Configuration naming a resource kind that may own images.
#[derive(Clone, Debug, Deserialize)]
pub struct ResourceDefinition {
    /// Path segment used for this resource, eg `users` in `/users/42/uploads`.
    pub kind: String,
    /// Table holding the resource's records. Backends that can check existence use it; without
    /// it any id is accepted.
    pub table: Option<String>,
    #[serde(default = "default_id_column")]
    pub id_column: String,
}

/// Resolves the owning resource addressed by a request.
#[async_trait]
pub trait OwnerResolver: Send + Sync + 'static {
    /// Returns [`Error::NotFound`] for unknown resource kinds or records.
    async fn resolve(&self, kind: &str, id: &str) -> Result<OwnerRef>;
}

/// [`OwnerResolver`] that accepts any id for a fixed set of resource kinds.
#[derive(Clone, Debug)]
pub struct StaticOwnerResolver {
    kinds: HashSet<String>,
}

impl StaticOwnerResolver {
    pub fn new<I, S>(kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kinds: kinds.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_definitions(definitions: &[ResourceDefinition]) -> Self {
        Self::new(definitions.iter().map(|d| d.kind.clone()))
    }
}

#[async_trait]
impl OwnerResolver for StaticOwnerResolver {
    async fn resolve(&self, kind: &str, id: &str) -> Result<OwnerRef> {
        if !self.kinds.contains(kind) || id.is_empty() {
            return Err(Error::NotFound(format!("resource {kind}/{id}")));
        }
        Ok(OwnerRef::new(kind, id))
    }
}

/// Operations an [`UploadGate`] is asked to authorize.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadAction {
    Initiate,
    Append,
    Complete,
    Status,
}

/// Authorization contract consulted before any upload operation touches an owner's uploads.
#[async_trait]
pub trait UploadGate: Send + Sync + 'static {
    /// `credentials` is the raw `Authorization` header value, when one was sent. Returns
    /// [`Error::Unauthorized`] to deny.
    async fn authorize(
        &self,
        owner: &OwnerRef,
        action: UploadAction,
        credentials: Option<&str>,
    ) -> Result<()>;
}

/// [`UploadGate`] that allows every request.
#[derive(Clone, Copy, Debug, Default)]
pub struct OpenGate;

#[async_trait]
impl UploadGate for OpenGate {
    async fn authorize(
        &self,
        _owner: &OwnerRef,
        _action: UploadAction,
        _credentials: Option<&str>,
    ) -> Result<()> {
        Ok(())
    }
}
