use crate::error::{ErrorKind, Result};
use crate::key::CacheKey;
use derive_more::{Display, From};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Feed-level identity of a video.
#[derive(Debug, Display, From, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaId(String);
impl MediaId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
impl From<&str> for MediaId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Container format hint; only used to pick a file extension and by players
/// that can't sniff the stream themselves.
#[derive(Debug, Display, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerHint {
    #[display("mp4")]
    Mp4,
    #[display("hls")]
    Hls,
    #[display("dash")]
    Dash,
    #[default]
    #[display("unknown")]
    Unknown,
}
impl ContainerHint {
    /// Guess the container from the path component of a URI.
    pub fn from_uri(uri: &str) -> Self {
        let path = uri.split(['?', '#']).next().unwrap_or(uri);
        let Some((_, extension)) = path.rsplit_once('.') else {
            return Self::Unknown;
        };
        match extension.to_ascii_lowercase().as_str() {
            "mp4" | "m4v" | "mov" => Self::Mp4,
            "m3u8" => Self::Hls,
            "mpd" => Self::Dash,
            _ => Self::Unknown,
        }
    }

    /// File extension used for cached copies.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Hls => "m3u8",
            Self::Dash => "mpd",
            Self::Unknown => "bin",
        }
    }
}

/// Opaque DRM details handed through to the player untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DrmDescriptor {
    pub scheme: String,
    pub license_uri: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// Immutable description of one playable resource.
///
/// The [`CacheKey`] is derived once from the id and URI at construction, so
/// every component that sees the same descriptor agrees on its key.
///
/// # Examples
///
/// ```
/// use preroll_media::{ContainerHint, MediaDescriptor};
///
/// let descriptor = MediaDescriptor::new("clip-1", "https://cdn.example.com/clip-1.m3u8")
///     .with_header("Authorization", "Bearer abc");
/// assert_eq!(descriptor.container(), ContainerHint::Hls);
/// assert!(descriptor.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "DescriptorFields", into = "DescriptorFields")]
pub struct MediaDescriptor {
    id: MediaId,
    uri: String,
    container: ContainerHint,
    headers: BTreeMap<String, String>,
    drm: Option<DrmDescriptor>,
    key: CacheKey,
}
impl MediaDescriptor {
    /// Create a descriptor, guessing the container from the URI.
    pub fn new(id: impl Into<MediaId>, uri: impl Into<String>) -> Self {
        let id = id.into();
        let uri = uri.into();
        let key = CacheKey::derive(id.as_str(), &uri);
        Self {
            container: ContainerHint::from_uri(&uri),
            id,
            uri,
            headers: BTreeMap::new(),
            drm: None,
            key,
        }
    }

    pub fn with_container(mut self, container: ContainerHint) -> Self {
        self.container = container;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_headers(mut self, headers: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>) -> Self {
        self.headers.extend(headers.into_iter().map(|(name, value)| (name.into(), value.into())));
        self
    }

    pub fn with_drm(mut self, drm: DrmDescriptor) -> Self {
        self.drm = Some(drm);
        self
    }

    pub fn id(&self) -> &MediaId {
        &self.id
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn container(&self) -> ContainerHint {
        self.container
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn drm(&self) -> Option<&DrmDescriptor> {
        self.drm.as_ref()
    }

    pub fn cache_key(&self) -> CacheKey {
        self.key
    }

    /// Check the descriptor is usable before any work is started for it.
    ///
    /// A URI must carry a scheme (`https:`, `file:`, ...) followed by a
    /// non-empty remainder and must not contain whitespace.
    pub fn validate(&self) -> Result<()> {
        if self.id.as_str().trim().is_empty() {
            exn::bail!(ErrorKind::EmptyId);
        }
        if !has_scheme(&self.uri) || self.uri.chars().any(char::is_whitespace) {
            exn::bail!(ErrorKind::InvalidUri(self.uri.clone()));
        }
        Ok(())
    }
}

fn has_scheme(uri: &str) -> bool {
    let Some((scheme, rest)) = uri.split_once(':') else {
        return false;
    };
    let mut chars = scheme.chars();
    let valid_scheme = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    valid_scheme && !rest.trim_start_matches('/').is_empty()
}

#[derive(Serialize, Deserialize)]
struct DescriptorFields {
    id: MediaId,
    uri: String,
    #[serde(default)]
    container: Option<ContainerHint>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    drm: Option<DrmDescriptor>,
}
impl From<DescriptorFields> for MediaDescriptor {
    fn from(fields: DescriptorFields) -> Self {
        let mut descriptor = MediaDescriptor::new(fields.id, fields.uri).with_headers(fields.headers);
        if let Some(container) = fields.container {
            descriptor = descriptor.with_container(container);
        }
        descriptor.drm = fields.drm;
        descriptor
    }
}
impl From<MediaDescriptor> for DescriptorFields {
    fn from(descriptor: MediaDescriptor) -> Self {
        Self {
            id: descriptor.id,
            uri: descriptor.uri,
            container: Some(descriptor.container),
            headers: descriptor.headers,
            drm: descriptor.drm,
        }
    }
}
