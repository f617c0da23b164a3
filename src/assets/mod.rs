use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::app::{EstuaryError, Result};

/// Extension/MIME pairs the cache will store. Anything else is refused.
const KNOWN_TYPES: [(&str, &str); 7] = [
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("gif", "image/gif"),
    ("svg", "image/svg+xml"),
    ("webp", "image/webp"),
    ("ico", "image/x-icon"),
    ("avif", "image/avif"),
];

/// Where a client should get an icon from.
#[derive(Debug, Clone, PartialEq)]
pub enum IconSource {
    /// Serve the locally cached file with this content type.
    Cached {
        path: PathBuf,
        content_type: String,
    },
    /// No local copy yet; redirect to the origin.
    Remote(String),
}

/// Content-addressed store for remote icons and thumbnails. File names are
/// the SHA-256 of the source URL plus a whitelisted extension, so a cached
/// path can always be re-validated before serving.
pub struct AssetCache {
    dir: PathBuf,
}

impl AssetCache {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Persist fetched bytes, returning the cache path and resolved
    /// content type. Refuses payloads with no recognizable image type.
    pub fn store(
        &self,
        url: &str,
        bytes: &[u8],
        content_type: Option<&str>,
    ) -> Result<(PathBuf, String)> {
        let (ext, mime) = resolve_type(url, content_type).ok_or_else(|| {
            EstuaryError::Other(format!("unsupported asset type for {url}"))
        })?;

        let name = format!("{}.{ext}", hash_url(url));
        let path = self.dir.join(name);
        std::fs::write(&path, bytes)?;
        Ok((path, mime.to_string()))
    }

    /// Resolve a feed's icon to a serving source. A stored path is only
    /// trusted if it still exists and its file name has the cache's
    /// content-addressed shape (no traversal, no foreign files).
    pub fn resolve(
        &self,
        icon_path: Option<&str>,
        icon_content_type: Option<&str>,
        icon_url: Option<&str>,
    ) -> Option<IconSource> {
        if let (Some(path), Some(content_type)) = (icon_path, icon_content_type) {
            let path = PathBuf::from(path);
            if self.is_safe_cache_path(&path) && path.exists() {
                return Some(IconSource::Cached {
                    path,
                    content_type: content_type.to_string(),
                });
            }
        }

        icon_url.map(|url| IconSource::Remote(url.to_string()))
    }

    fn is_safe_cache_path(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        path.parent() == Some(self.dir.as_path()) && is_safe_file_name(name)
    }
}

fn hash_url(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hex::encode(hasher.finalize())
}

/// `<64 hex chars>.<known extension>` and nothing else.
fn is_safe_file_name(name: &str) -> bool {
    let Some((stem, ext)) = name.split_once('.') else {
        return false;
    };
    stem.len() == 64
        && stem.chars().all(|c| c.is_ascii_hexdigit())
        && KNOWN_TYPES.iter().any(|(e, _)| *e == ext)
}

/// Resolve (extension, mime) from the content type, falling back to the
/// URL's own extension.
fn resolve_type(url: &str, content_type: Option<&str>) -> Option<(&'static str, &'static str)> {
    if let Some(ct) = content_type {
        let ct = ct.split(';').next().unwrap_or(ct).trim().to_ascii_lowercase();
        let normalized = if ct == "image/vnd.microsoft.icon" {
            "image/x-icon".to_string()
        } else {
            ct
        };
        if let Some(found) = KNOWN_TYPES.iter().find(|(_, m)| *m == normalized) {
            return Some(*found);
        }
    }

    let path = url.split(['?', '#']).next().unwrap_or(url);
    let ext = path.rsplit('.').next()?.to_ascii_lowercase();
    let ext = if ext == "jpeg" { "jpg".to_string() } else { ext };
    KNOWN_TYPES.iter().find(|(e, _)| *e == ext).copied()
}
