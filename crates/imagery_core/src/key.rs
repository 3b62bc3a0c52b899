use std::path::PathBuf;

use imagery_objectstore::Key;
use uuid::Uuid;

use crate::content_type::ImageContentType;
use crate::owner::OwnerRef;
use crate::{Error, Result};

/// Derives the object store key an upload is assembled at.
///
/// Implementations must be pure functions of their inputs so that a session's key can be
/// recomputed and substituted in tests without a storage backend.
pub trait KeyStrategy: Send + Sync + 'static {
    fn object_key(
        &self,
        owner: &OwnerRef,
        session_id: &Uuid,
        content_type: ImageContentType,
    ) -> Result<Key>;
}

/// `{prefix}/{owner kind}/{owner id}/{session id}.{extension}`
#[derive(Clone, Debug)]
pub struct DefaultKeyStrategy {
    prefix: String,
}

impl DefaultKeyStrategy {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Default for DefaultKeyStrategy {
    fn default() -> Self {
        Self::new("images")
    }
}

impl KeyStrategy for DefaultKeyStrategy {
    fn object_key(
        &self,
        owner: &OwnerRef,
        session_id: &Uuid,
        content_type: ImageContentType,
    ) -> Result<Key> {
        let mut pb = PathBuf::from(&self.prefix);
        pb.push(&owner.kind);
        pb.push(&owner.id);
        pb.push(format!("{session_id}.{}", content_type.extension()));

        Key::try_from(pb).map_err(|e| {
            Error::InvalidArgument(format!("cannot derive storage key for {owner}: {e}"))
        })
    }
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::*;

    #[rstest]
    #[case::plain(OwnerRef::new("users", "42"), true)]
    #[case::slug(OwnerRef::new("products", "blue-mug_v2"), true)]
    #[case::traversal(OwnerRef::new("users", ".."), false)]
    #[case::nested(OwnerRef::new("users", "42/../../etc"), false)]
    #[case::space(OwnerRef::new("users", "4 2"), false)]
    fn derive(#[case] owner: OwnerRef, #[case] ok: bool) {
        let id = Uuid::new_v4();
        let actual = DefaultKeyStrategy::default().object_key(&owner, &id, ImageContentType::Jpeg);
        match actual {
            Ok(key) => {
                assert!(ok, "expected failure, got {key}");
                assert_eq!(
                    String::from(&key),
                    format!("images/{}/{}/{id}.jpg", owner.kind, owner.id)
                );
            }
            Err(e) => {
                assert!(!ok, "expected key, got {e}");
                assert!(matches!(e, Error::InvalidArgument(_)));
            }
        }
    }

    #[test]
    fn deterministic() {
        let owner = OwnerRef::new("users", "7");
        let id = Uuid::new_v4();
        let strategy = DefaultKeyStrategy::new("uploads");
        let a = strategy.object_key(&owner, &id, ImageContentType::Png).unwrap();
        let b = strategy.object_key(&owner, &id, ImageContentType::Png).unwrap();
        assert_eq!(a, b);
    }
}
