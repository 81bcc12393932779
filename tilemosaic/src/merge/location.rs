//! Where manifests and slices live: local paths or remote URLs.

use std::path::{Path, PathBuf};

use percent_encoding::percent_decode_str;
use url::Url;

use super::error::{MergeError, MergeResult};

/// Whether `url` names a local file: a plain path or a `file:` URL.
pub fn is_local(url: &str) -> bool {
    match Url::parse(url) {
        Ok(parsed) => parsed.scheme() == "file",
        Err(_) => true,
    }
}

/// Path of a local reference.
pub fn local_path(url: &str) -> PathBuf {
    match Url::parse(url) {
        Ok(parsed) if parsed.scheme() == "file" => parsed
            .to_file_path()
            .unwrap_or_else(|()| PathBuf::from(parsed.path())),
        _ => PathBuf::from(url),
    }
}

/// Last path segment of `url`, percent-decoded.
///
/// ```
/// use tilemosaic::merge::file_name_from_url;
///
/// assert_eq!(
///     file_name_from_url("https://example.com/tiles/part%201.pmtiles?sig=x"),
///     "part 1.pmtiles"
/// );
/// ```
pub fn file_name_from_url(url: &str) -> String {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.to_string(),
    };
    let name = path.rsplit('/').next().unwrap_or_default();
    percent_decode_str(name).decode_utf8_lossy().into_owned()
}

/// Resolve a slice reference against the manifest location.
///
/// Local manifests resolve relative to their directory; remote ones follow
/// URL joining rules.
pub fn resolve_slice_url(mosaic_url: &str, slice_ref: &str) -> MergeResult<String> {
    if is_local(mosaic_url) {
        let base = local_path(mosaic_url);
        let parent = base.parent().unwrap_or_else(|| Path::new(""));
        return Ok(parent.join(slice_ref).to_string_lossy().into_owned());
    }

    let base = Url::parse(mosaic_url)
        .map_err(|e| MergeError::InvalidManifest(format!("bad mosaic URL {}: {}", mosaic_url, e)))?;
    let joined = base
        .join(slice_ref)
        .map_err(|e| MergeError::InvalidManifest(format!("bad slice reference {}: {}", slice_ref, e)))?;
    Ok(joined.into())
}
