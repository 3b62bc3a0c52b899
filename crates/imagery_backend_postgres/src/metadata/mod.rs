mod postgres;
pub use postgres::{PostgresConfig, PostgresMetadataPool};

mod types;
