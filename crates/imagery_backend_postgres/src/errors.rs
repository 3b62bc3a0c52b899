use thiserror;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("imagery error: {0}")]
    ImageryError(#[from] imagery_core::Error),

    #[error("objectstore error: {0}")]
    ObjectStoreError(#[from] imagery_objectstore::Error),

    #[error("sqlx error: {0}")]
    SQLXError(#[from] sqlx::Error),
    #[error("sqlx migration error: {0}")]
    SQLXMigrateError(#[from] sqlx::migrate::MigrateError),
    #[error("sea-query error: {0}")]
    SeaQueryError(#[from] sea_query::error::Error),

    // metadata errors
    #[error("PostgresMetadataTx already rolled back or committed")]
    PostgresMetadataTxInactive,
    #[error("upload {0} was modified concurrently")]
    StaleSession(Uuid),
    #[error("upload {0} does not exist")]
    MissingSession(Uuid),
    #[error("image {0} does not exist")]
    MissingImage(Uuid),
}

/// True when a statement was rejected by a unique constraint or index.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.kind() == sqlx::error::ErrorKind::UniqueViolation
    )
}

impl From<Error> for imagery_core::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::ImageryError(e) => e,
            Error::ObjectStoreError(e) => imagery_core::Error::Unavailable(e),
            Error::StaleSession(_) => imagery_core::Error::Conflict(e.to_string()),
            Error::MissingSession(_) | Error::MissingImage(_) => {
                imagery_core::Error::NotFound(e.to_string())
            }
            Error::SQLXError(ref sqlx_err) if is_unique_violation(sqlx_err) => {
                tracing::debug!("unique violation: {sqlx_err}");
                imagery_core::Error::Conflict(String::from(
                    "an upload or image with the same owner and content already exists",
                ))
            }
            _ => imagery_core::Error::BackendError(Box::new(e)),
        }
    }
}

#[cfg(test)]
mod test {
    use imagery_core::ErrorKind;
    use rstest::*;

    use super::*;

    #[rstest]
    #[case::stale(Error::StaleSession(Uuid::nil()), ErrorKind::Conflict)]
    #[case::missing_session(Error::MissingSession(Uuid::nil()), ErrorKind::NotFound)]
    #[case::missing_image(Error::MissingImage(Uuid::nil()), ErrorKind::NotFound)]
    #[case::inactive_tx(Error::PostgresMetadataTxInactive, ErrorKind::Internal)]
    #[case::sqlx(Error::SQLXError(sqlx::Error::RowNotFound), ErrorKind::Internal)]
    #[case::core(
        imagery_core::Error::InvalidState(String::from("x")).into(),
        ErrorKind::InvalidState
    )]
    fn maps_onto_core_kinds(#[case] err: Error, #[case] expected: ErrorKind) {
        assert_eq!(imagery_core::Error::from(err).kind(), expected);
    }
}
