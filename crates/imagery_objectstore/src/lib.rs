use std::path::Component;
use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use once_cell::sync::Lazy;
use regex::Regex;

mod config;
pub use config::Config;
mod errors;
pub use errors::{Error, KeyError, Result};
mod memory;
pub use memory::{Memory, MemoryConfig};
pub(crate) mod s3;
pub use s3::S3Config;
pub use s3::S3;

/// A single part of a multipart upload as acknowledged by the backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    pub e_tag: Option<String>,
    pub chunk_number: i32,
}

/// A wrapper around [`std::path::PathBuf`] that rejects unsavory key names.
///
/// The following rules applied during the [`TryFrom<PathBuf>`] implementation:
///
/// * paths must not start with `/`
/// * paths are delimited by `/`
/// * paths are normalized (`//` are replaced with `/` and never end in `/`)
/// * paths must not contain relative segments (ie `.` or `..`)
/// * only characters explicitly documented as safe [in the S3
///   docs](https://docs.aws.amazon.com/AmazonS3/latest/userguide/object-keys.html) are allowed in
///   path segments
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Key {
    key: PathBuf,
}

impl From<&Key> for String {
    fn from(k: &Key) -> String {
        format!("{}", k.key.display())
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.key.display())
    }
}

impl TryFrom<PathBuf> for Key {
    type Error = Error;

    fn try_from(pb: PathBuf) -> Result<Key> {
        let key = pb
            .components()
            .try_fold(PathBuf::new(), validate_component)?;
        if key.as_os_str().is_empty() {
            return Err(KeyError::Empty.into());
        }
        Ok(Key { key })
    }
}

impl TryFrom<&str> for Key {
    type Error = Error;

    fn try_from(s: &str) -> Result<Key> {
        PathBuf::from(s).try_into()
    }
}

fn validate_component(mut pb: PathBuf, c: Component<'_>) -> std::result::Result<PathBuf, KeyError> {
    static RE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"^[a-zA-Z0-9_.*'()!-]+$").expect("key component regex must compile")
    });
    match c {
        Component::Prefix(_) => return Err(KeyError::PrefixNotAllowed),
        Component::RootDir => return Err(KeyError::RootDirNotAllowed),
        Component::CurDir => return Err(KeyError::CurDirNotAllowed),
        Component::ParentDir => return Err(KeyError::ParentDirNotAllowed),
        Component::Normal(s) => {
            if let Some(s) = s.to_str() {
                if !RE.is_match(s) {
                    return Err(KeyError::PathComponentsMustMatchRegex(
                        RE.as_str().to_string(),
                    ));
                }
            } else {
                return Err(KeyError::PathComponentsMustBeValidUnicode);
            }
        }
    }
    pb.push(c);
    Ok(pb)
}

pub type ObjectBody = BoxStream<'static, Result<Bytes>>;

/// Provides a common interface for interacting with different kinds of backend object stores.
///
/// Object retrieval returns a [`futures::stream::Stream`] over [`bytes::Bytes`]; parts are
/// uploaded as whole [`bytes::Bytes`] buffers since every caller has already accumulated them.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Smallest size the backend accepts for any part except the last one of an upload.
    fn min_part_size(&self) -> u64;

    async fn get(&self, key: &Key) -> Result<ObjectBody>;

    /// Open a multipart upload that will eventually be assembled at `key`, returning the
    /// backend's upload id.
    async fn initiate_chunked_upload(&self, key: &Key) -> Result<String>;

    /// Upload one part. Uploading the same `chunk_number` twice replaces the earlier part.
    async fn upload_chunk(
        &self,
        upload_id: &str,
        key: &Key,
        chunk_number: i32,
        body: Bytes,
    ) -> Result<Chunk>;

    /// Assemble `chunks`, in ascending `chunk_number` order, into the object at `key`.
    async fn finalize_chunked_upload(
        &self,
        upload_id: &str,
        key: &Key,
        chunks: Vec<Chunk>,
    ) -> Result<()>;

    async fn abort_chunked_upload(&self, upload_id: &str, key: &Key) -> Result<()>;

    /// Remove the assembled object at `key`. Removing a missing object is not an error.
    async fn delete(&self, key: &Key) -> Result<()>;
}
