use serde::Deserialize;

const MIB: u64 = 1024 * 1024;

fn default_flush_threshold() -> u64 {
    5 * MIB
}

fn default_max_chunk_size() -> u64 {
    32 * MIB
}

fn default_tus_max_size() -> u64 {
    1024 * MIB
}

fn default_public_base_url() -> String {
    String::from("http://localhost:13030/objects")
}

/// Tunables for the upload pipeline, read from the `uploads` config section.
#[derive(Clone, Debug, Deserialize)]
pub struct UploadSettings {
    /// Buffered byte count at which an append forwards the buffer to the object store as one
    /// part. Must be at least the object store's minimum part size.
    #[serde(default = "default_flush_threshold")]
    pub flush_threshold: u64,

    /// Largest chunk a single append request may carry.
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: u64,

    /// Largest `Upload-Length` accepted by the tus front door.
    #[serde(default = "default_tus_max_size")]
    pub tus_max_size: u64,

    /// Prefix joined with an image's storage key to form its address.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            flush_threshold: default_flush_threshold(),
            max_chunk_size: default_max_chunk_size(),
            tus_max_size: default_tus_max_size(),
            public_base_url: default_public_base_url(),
        }
    }
}

impl UploadSettings {
    pub fn image_url(&self, storage_key: &str) -> String {
        format!(
            "{}/{}",
            self.public_base_url.trim_end_matches('/'),
            storage_key
        )
    }
}
