use digest::DynDigest;
use md5::Md5;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// MD5 digest of an image's bytes rendered as 32 lowercase hex characters.
///
/// Serves both as the client-declared expectation for an upload and as the deduplication key
/// for images under one owner.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

static CONTENT_HASH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9a-f]{32}$").expect("content hash regex must compile"));

impl ContentHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn digester() -> Digester {
        Digester::new(Box::new(Md5::default()))
    }

    pub fn compute(bytes: &[u8]) -> ContentHash {
        let mut digester = Self::digester();
        digester.update(bytes);
        digester.finalize()
    }
}

impl TryFrom<&str> for ContentHash {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        if !CONTENT_HASH.is_match(s) {
            return Err(Error::InvalidArgument(format!(
                "content hash must be 32 lowercase hex characters: {s:?}"
            )));
        }
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for ContentHash {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.as_str().try_into()
    }
}

impl From<ContentHash> for String {
    fn from(h: ContentHash) -> String {
        h.0
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Incrementally computes a [`ContentHash`] over a stream of byte slices.
pub struct Digester {
    digester: Box<dyn DynDigest + 'static + Send>,
    bytes: u64,
}

impl Digester {
    pub fn new(digester: Box<dyn DynDigest + 'static + Send>) -> Self {
        Self { digester, bytes: 0 }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.digester.update(data);
        self.bytes += data.len() as u64;
    }

    #[inline]
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn finalize(self) -> ContentHash {
        let hex = self
            .digester
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect();
        ContentHash(hex)
    }
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::*;

    #[rstest]
    #[case::valid("d41d8cd98f00b204e9800998ecf8427e", Ok(()))]
    #[case::uppercase(
        "D41D8CD98F00B204E9800998ECF8427E",
        Err(Error::InvalidArgument(String::from(
            "content hash must be 32 lowercase hex characters: \"D41D8CD98F00B204E9800998ECF8427E\""
        )))
    )]
    #[case::short(
        "d41d8cd9",
        Err(Error::InvalidArgument(String::from(
            "content hash must be 32 lowercase hex characters: \"d41d8cd9\""
        )))
    )]
    #[case::sha256_sized(
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
        Err(Error::InvalidArgument(String::from(
            "content hash must be 32 lowercase hex characters: \"e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855\""
        )))
    )]
    fn validate_try_from(#[case] input: &str, #[case] expected: Result<()>) {
        let actual: Result<ContentHash> = input.try_into();
        match (expected, actual) {
            (Ok(()), Ok(act)) => assert_eq!(input, act.as_str()),
            (Ok(()), Err(e)) => panic!("expected Ok got Err( {e:?} )"),
            (Err(exp), Err(act)) => assert_eq!(format!("{exp}"), format!("{act}")),
            (Err(e), Ok(s)) => panic!("expected Err( {e:?} ) got Ok( {s:?} )"),
        }
    }

    #[test]
    fn incremental_digest_matches_one_shot() {
        let mut digester = ContentHash::digester();
        digester.update(b"hello ");
        digester.update(b"world");
        assert_eq!(digester.bytes(), 11);
        let incremental = digester.finalize();

        assert_eq!(incremental, ContentHash::compute(b"hello world"));
        assert_eq!(incremental.as_str(), "5eb63bbbe01eeed093cb22bb8f5acdc3");
    }

    #[test]
    fn empty_input() {
        assert_eq!(
            ContentHash::compute(b"").as_str(),
            "d41d8cd98f00b204e9800998ecf8427e"
        );
    }
}
