use crate::error::{Error, ErrorKind};
use std::fmt;
use std::str::FromStr;

/// Stable identifier for cache and registry entries.
///
/// BLAKE3 of the media id and URI. Both inputs are length-prefixed so that
/// `("ab", "c")` and `("a", "bc")` never collide. Rendered as 64 lowercase
/// hex characters, which is also the stem of the cached file name.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey([u8; blake3::OUT_LEN]);
impl CacheKey {
    pub(crate) fn derive(id: &str, uri: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        for part in [id, uri] {
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        Self(*hasher.finalize().as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; blake3::OUT_LEN] {
        &self.0
    }
}
impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(blake3::Hash::from_bytes(self.0).to_hex().as_str())
    }
}
impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({self})")
    }
}
impl FromStr for CacheKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // `from_hex` accepts uppercase too; file names are always lowercase.
        if s.bytes().any(|b| b.is_ascii_uppercase()) {
            exn::bail!(ErrorKind::InvalidKey(s.to_string()));
        }
        blake3::Hash::from_hex(s)
            .map(|hash| Self(*hash.as_bytes()))
            .map_err(|_| exn::Exn::from(ErrorKind::InvalidKey(s.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MediaDescriptor;

    #[test]
    fn key_is_stable_hex() {
        let key = MediaDescriptor::new("clip-1", "https://example.com/clip-1.mp4").cache_key();
        let rendered = key.to_string();
        assert_eq!(rendered.len(), 64);
        assert!(rendered.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)));
        assert_eq!(rendered.parse::<CacheKey>().unwrap(), key);
        assert_eq!(key, MediaDescriptor::new("clip-1", "https://example.com/clip-1.mp4").cache_key());
    }

    #[test]
    fn key_depends_on_id_and_uri() {
        let a = CacheKey::derive("clip", "https://example.com/a");
        assert_ne!(a, CacheKey::derive("clip-2", "https://example.com/a"));
        assert_ne!(a, CacheKey::derive("clip", "https://example.com/b"));
        assert_ne!(CacheKey::derive("ab", "c"), CacheKey::derive("a", "bc"));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("not-a-key".parse::<CacheKey>().is_err());
        let upper = CacheKey::derive("a", "b").to_string().to_uppercase();
        assert!(upper.parse::<CacheKey>().is_err());
    }
}
