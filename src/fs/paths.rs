//! Destination filename derivation and correction.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use url::Url;

use crate::error::{Error, Result};

/// Canonical extension per media MIME type, preferred over whatever
/// `mime_guess` lists first. Read-only after initialization.
static MEDIA_EXTENSIONS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("image/bmp", "bmp"),
        ("image/gif", "gif"),
        ("image/jpeg", "jpg"),
        ("image/png", "png"),
        ("image/tiff", "tiff"),
        ("image/webp", "webp"),
        ("video/mp4", "mp4"),
        ("video/webm", "webm"),
    ])
});

/// Derive the destination path for a media URL from its final path segment.
pub fn destination_for_url(save_dir: &Path, raw_url: &str) -> Result<PathBuf> {
    let url = Url::parse(raw_url)?;
    let filename = url
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).next_back())
        .ok_or_else(|| Error::Download(format!("no filename in URL: {}", raw_url)))?;

    Ok(save_dir.join(filename))
}

/// Correct a destination path using the response headers: prefer a filename
/// given in Content-Disposition; otherwise rewrite the extension when it
/// does not match the Content-Type.
pub fn fixup_file_path(
    save_dir: &Path,
    path: &Path,
    content_disposition: Option<&str>,
    content_type: Option<&str>,
) -> PathBuf {
    if let Some(filename) = content_disposition.and_then(disposition_filename) {
        return save_dir.join(filename);
    }

    if let Some(content_type) = content_type {
        let extensions = extensions_for(content_type);
        if !extensions.is_empty() {
            let current = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_ascii_lowercase())
                .unwrap_or_default();

            if !extensions.iter().any(|e| *e == current) {
                return path.with_extension(&extensions[0]);
            }
        }
    }

    path.to_path_buf()
}

/// Extract the filename parameter of a Content-Disposition header value,
/// reduced to its final path component.
fn disposition_filename(value: &str) -> Option<String> {
    for param in value.split(';') {
        let param = param.trim();
        if let Some(filename) = param.strip_prefix("filename=") {
            let filename = filename.trim_matches('"');
            // Guard against separators smuggled into the header.
            let filename = Path::new(filename).file_name()?.to_str()?;
            if !filename.is_empty() && filename != ".." {
                return Some(filename.to_string());
            }
        }
    }

    None
}

/// All extensions accepted for a Content-Type, canonical choice first.
fn extensions_for(content_type: &str) -> Vec<String> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim()
        .to_ascii_lowercase();

    let mut extensions = Vec::new();
    if let Some(canonical) = MEDIA_EXTENSIONS.get(essence.as_str()) {
        extensions.push(canonical.to_string());
    }

    if let Some(guessed) = mime_guess::get_mime_extensions_str(&essence) {
        for ext in guessed {
            if !extensions.iter().any(|e| e == ext) {
                extensions.push(ext.to_string());
            }
        }
    }

    extensions
}
