//! In-process [`ObjectStore`] used for local development and tests.
//!
//! Mirrors the S3 multipart contract closely enough that upload logic exercised against it
//! behaves the same against a real bucket: parts are addressed by number, each part's ETag is the
//! quoted MD5 of its bytes, non-final parts below [`MemoryConfig::min_part_size`] are rejected at
//! assembly time and assembly consumes the upload id.
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::StreamExt;
use md5::{Digest, Md5};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::errors::{Error, Result};
use crate::{Chunk, Key, ObjectBody, ObjectStore};

#[derive(Clone, Debug, Default, Deserialize)]
pub struct MemoryConfig {
    #[serde(default)]
    pub min_part_size: u64,
}

impl MemoryConfig {
    pub fn new_objects(&self) -> Memory {
        Memory::new(self.min_part_size)
    }
}

struct PendingUpload {
    key: Key,
    parts: BTreeMap<i32, Bytes>,
}

#[derive(Default)]
struct State {
    uploads: HashMap<String, PendingUpload>,
    objects: HashMap<Key, Bytes>,
}

#[derive(Clone)]
pub struct Memory {
    min_part_size: u64,
    next_upload: Arc<AtomicU64>,
    state: Arc<Mutex<State>>,
}

impl Memory {
    pub fn new(min_part_size: u64) -> Self {
        Self {
            min_part_size,
            next_upload: Arc::new(AtomicU64::new(1)),
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    /// Number of parts currently held for an open upload.
    pub async fn pending_parts(&self, upload_id: &str) -> Option<usize> {
        let state = self.state.lock().await;
        state.uploads.get(upload_id).map(|u| u.parts.len())
    }

    /// Returns the assembled object stored at `key`, if any.
    pub async fn object(&self, key: &Key) -> Option<Bytes> {
        self.state.lock().await.objects.get(key).cloned()
    }
}

fn e_tag(body: &[u8]) -> String {
    let digest = Md5::digest(body);
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("\"{hex}\"")
}

#[async_trait]
impl ObjectStore for Memory {
    fn min_part_size(&self) -> u64 {
        self.min_part_size
    }

    async fn get(&self, key: &Key) -> Result<ObjectBody> {
        let state = self.state.lock().await;
        let object = state
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NoSuchKey(key.to_string()))?;
        Ok(futures::stream::once(async move { Ok(object) }).boxed())
    }

    async fn initiate_chunked_upload(&self, key: &Key) -> Result<String> {
        let upload_id = format!("memory-{}", self.next_upload.fetch_add(1, Ordering::SeqCst));
        let mut state = self.state.lock().await;
        state.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                key: key.clone(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_chunk(
        &self,
        upload_id: &str,
        key: &Key,
        chunk_number: i32,
        body: Bytes,
    ) -> Result<Chunk> {
        let mut state = self.state.lock().await;
        let upload = state
            .uploads
            .get_mut(upload_id)
            .filter(|u| &u.key == key)
            .ok_or_else(|| Error::NoSuchUpload(upload_id.to_string()))?;

        let e_tag = e_tag(&body);
        upload.parts.insert(chunk_number, body);
        Ok(Chunk {
            e_tag: Some(e_tag),
            chunk_number,
        })
    }

    async fn finalize_chunked_upload(
        &self,
        upload_id: &str,
        key: &Key,
        mut chunks: Vec<Chunk>,
    ) -> Result<()> {
        chunks.sort_by_key(|c| c.chunk_number);

        let mut state = self.state.lock().await;
        let upload = state
            .uploads
            .get(upload_id)
            .filter(|u| &u.key == key)
            .ok_or_else(|| Error::NoSuchUpload(upload_id.to_string()))?;

        let mut assembled = BytesMut::new();
        let last = chunks.len().saturating_sub(1);
        for (i, chunk) in chunks.iter().enumerate() {
            let part = upload
                .parts
                .get(&chunk.chunk_number)
                .ok_or(Error::InvalidPart(chunk.chunk_number))?;
            if chunk.e_tag.is_some() && chunk.e_tag.as_deref() != Some(e_tag(part).as_str()) {
                return Err(Error::InvalidPart(chunk.chunk_number));
            }
            if i < last && (part.len() as u64) < self.min_part_size {
                return Err(Error::EntityTooSmall(chunk.chunk_number));
            }
            assembled.extend_from_slice(part);
        }

        state.uploads.remove(upload_id);
        state.objects.insert(key.clone(), assembled.freeze());
        Ok(())
    }

    async fn abort_chunked_upload(&self, upload_id: &str, _key: &Key) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .uploads
            .remove(upload_id)
            .map(|_| ())
            .ok_or_else(|| Error::NoSuchUpload(upload_id.to_string()))
    }

    async fn delete(&self, key: &Key) -> Result<()> {
        self.state.lock().await.objects.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use futures::stream::TryStreamExt;

    use super::*;

    async fn read(objects: &Memory, key: &Key) -> Vec<u8> {
        let body = objects.get(key).await.expect("object should exist");
        let chunks: Vec<Bytes> = body.try_collect().await.expect("body should stream");
        chunks.concat()
    }

    #[tokio::test]
    async fn assembles_parts_in_ascending_order() {
        let objects = Memory::new(4);
        let key = Key::try_from("images/users/1/a.png").unwrap();
        let upload_id = objects.initiate_chunked_upload(&key).await.unwrap();

        let second = objects
            .upload_chunk(&upload_id, &key, 2, Bytes::from_static(b"tail"))
            .await
            .unwrap();
        let first = objects
            .upload_chunk(&upload_id, &key, 1, Bytes::from_static(b"head"))
            .await
            .unwrap();

        objects
            .finalize_chunked_upload(&upload_id, &key, vec![second, first])
            .await
            .unwrap();

        assert_eq!(read(&objects, &key).await, b"headtail");
        assert_eq!(objects.pending_parts(&upload_id).await, None);
    }

    #[tokio::test]
    async fn delete_removes_assembled_object() {
        let objects = Memory::new(0);
        let key = Key::try_from("images/users/1/d.png").unwrap();
        let upload_id = objects.initiate_chunked_upload(&key).await.unwrap();
        let part = objects
            .upload_chunk(&upload_id, &key, 1, Bytes::from_static(b"gone"))
            .await
            .unwrap();
        objects
            .finalize_chunked_upload(&upload_id, &key, vec![part])
            .await
            .unwrap();

        objects.delete(&key).await.unwrap();
        assert!(objects.object(&key).await.is_none());
        assert!(matches!(objects.get(&key).await, Err(Error::NoSuchKey(_))));

        // already gone
        objects.delete(&key).await.unwrap();
    }

    #[tokio::test]
    async fn rejects_small_non_final_parts() {
        let objects = Memory::new(8);
        let key = Key::try_from("images/users/1/b.png").unwrap();
        let upload_id = objects.initiate_chunked_upload(&key).await.unwrap();
        let a = objects
            .upload_chunk(&upload_id, &key, 1, Bytes::from_static(b"tiny"))
            .await
            .unwrap();
        let b = objects
            .upload_chunk(&upload_id, &key, 2, Bytes::from_static(b"end"))
            .await
            .unwrap();

        let err = objects
            .finalize_chunked_upload(&upload_id, &key, vec![a, b])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EntityTooSmall(1)), "{err:?}");
    }

    #[tokio::test]
    async fn rejects_stale_etag() {
        let objects = Memory::new(0);
        let key = Key::try_from("images/users/1/c.png").unwrap();
        let upload_id = objects.initiate_chunked_upload(&key).await.unwrap();
        let stale = objects
            .upload_chunk(&upload_id, &key, 1, Bytes::from_static(b"first"))
            .await
            .unwrap();
        objects
            .upload_chunk(&upload_id, &key, 1, Bytes::from_static(b"second"))
            .await
            .unwrap();

        let err = objects
            .finalize_chunked_upload(&upload_id, &key, vec![stale])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPart(1)), "{err:?}");
    }
}
