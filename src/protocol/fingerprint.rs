//! URL fingerprints for supported media sites.
//!
//! A fingerprint reduces a raw browser URL to the pair (site kind,
//! canonical URL) that sync messages carry. Two peers watching the same
//! video through differently decorated URLs (trailing slashes, query
//! strings, fragments) produce equal fingerprints; anything not in the
//! supported site table collapses to [`UrlFingerprint::Void`].

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

// ============================================================================
// SiteKind
// ============================================================================

/// Supported media sites.
///
/// Each kind maps to one (host, base path) row in [`SITE_TABLE`]; the
/// kind decides which media element the automation layer drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SiteKind {
    /// Regular bilibili video pages (`/video/...`).
    BilibiliVideo,
    /// Bilibili bangumi episode pages (`/bangumi/play/...`).
    BilibiliBangumi,
    /// Mutefun player pages (`/vodplay/...`).
    MutefunVideo,
    /// Kugou song pages (`/mixsong/...`).
    KugouMusic,
}

impl SiteKind {
    /// Returns the wire tag for this site kind.
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BilibiliVideo => "bilibili-video",
            Self::BilibiliBangumi => "bilibili-bangumi",
            Self::MutefunVideo => "mutefun-video",
            Self::KugouMusic => "kugou-music",
        }
    }
}

impl fmt::Display for SiteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recognition table: (kind, host, base path).
///
/// The base path is the URL path with its last segment removed, slashes
/// trimmed. First match wins.
pub const SITE_TABLE: [(SiteKind, &str, &str); 4] = [
    (SiteKind::BilibiliVideo, "www.bilibili.com", "video"),
    (SiteKind::BilibiliBangumi, "www.bilibili.com", "bangumi/play"),
    // https://www.mute01.com/vodplay/2657-2-1.html
    (SiteKind::MutefunVideo, "www.mute01.com", "vodplay"),
    (SiteKind::KugouMusic, "www.kugou.com", "mixsong"),
];

// ============================================================================
// UrlFingerprint
// ============================================================================

/// Canonical identity of a media page, or `Void` when unrecognized.
///
/// # Format
///
/// On the wire a fingerprint is a two-field object; both fields are
/// `null` for `Void`:
///
/// ```json
/// { "site": "bilibili-video", "url": "https://www.bilibili.com/video/BV1vx4y147cK" }
/// ```
///
/// Equality compares canonical URLs only (the site kind is derived
/// data); `Void` equals `Void` and nothing else.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "FingerprintWire", into = "FingerprintWire")]
pub enum UrlFingerprint {
    /// No supported page.
    Void,
    /// A recognized media page.
    Page {
        /// Which site table row matched.
        site: SiteKind,
        /// Canonical `scheme://host/path` form, slashes trimmed.
        url: String,
    },
}

impl UrlFingerprint {
    /// Parses a raw browser URL into a fingerprint.
    ///
    /// Never fails: malformed input and unrecognized pages both yield
    /// [`UrlFingerprint::Void`].
    #[must_use]
    pub fn parse(raw_url: &str) -> Self {
        let raw_url = raw_url.trim_matches('/');

        let Ok(parsed) = Url::parse(raw_url) else {
            return Self::Void;
        };
        let Some(host) = parsed.host_str() else {
            return Self::Void;
        };

        let path = parsed.path().trim_matches('/');
        // Everything up to the last segment decides the site; the last
        // segment is the media id and stays only in the canonical URL.
        let base_path = match path.rsplit_once('/') {
            Some((base, _)) => base.trim_matches('/'),
            None => "",
        };

        for (site, table_host, table_base) in SITE_TABLE {
            if host == table_host && base_path == table_base {
                return Self::Page {
                    site,
                    url: format!("{}://{host}/{path}", parsed.scheme()),
                };
            }
        }

        Self::Void
    }

    /// Returns the site kind, or `None` for `Void`.
    #[inline]
    #[must_use]
    pub fn site(&self) -> Option<SiteKind> {
        match self {
            Self::Void => None,
            Self::Page { site, .. } => Some(*site),
        }
    }

    /// Returns the canonical URL, or `None` for `Void`.
    #[inline]
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Void => None,
            Self::Page { url, .. } => Some(url),
        }
    }

    /// Returns `true` if no supported page was recognized.
    #[inline]
    #[must_use]
    pub fn is_void(&self) -> bool {
        matches!(self, Self::Void)
    }
}

impl PartialEq for UrlFingerprint {
    fn eq(&self, other: &Self) -> bool {
        self.url() == other.url()
    }
}

impl Eq for UrlFingerprint {}

impl fmt::Display for UrlFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Void => f.write_str("void"),
            Self::Page { url, .. } => f.write_str(url),
        }
    }
}

// ============================================================================
// Wire Form
// ============================================================================

/// Serialized shape of a fingerprint.
#[derive(Serialize, Deserialize)]
struct FingerprintWire {
    site: Option<SiteKind>,
    url: Option<String>,
}

impl From<UrlFingerprint> for FingerprintWire {
    fn from(fingerprint: UrlFingerprint) -> Self {
        match fingerprint {
            UrlFingerprint::Void => Self {
                site: None,
                url: None,
            },
            UrlFingerprint::Page { site, url } => Self {
                site: Some(site),
                url: Some(url),
            },
        }
    }
}

impl TryFrom<FingerprintWire> for UrlFingerprint {
    type Error = String;

    fn try_from(wire: FingerprintWire) -> Result<Self, Self::Error> {
        match (wire.site, wire.url) {
            (None, None) => Ok(Self::Void),
            (Some(site), Some(url)) => Ok(Self::Page { site, url }),
            _ => Err("fingerprint site and url must both be set or both be null".to_string()),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
