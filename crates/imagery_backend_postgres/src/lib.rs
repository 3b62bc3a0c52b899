mod config;
mod errors;
mod metadata;
mod owners;
mod stores;

pub use config::{PgBackend, PgBackendConfig};
pub use errors::{Error, Result};
pub use metadata::{PostgresConfig, PostgresMetadataPool};
pub use owners::PgOwnerResolver;
pub use stores::PgMetadata;
