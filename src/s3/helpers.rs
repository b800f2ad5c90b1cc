use chrono::{DateTime, Utc};
use slug::slugify;
use std::collections::BTreeMap;
use std::path::Path;

use super::error::{PresignError, Result};

/// Upload types the tool recognises by extension; anything else is sent as
/// `application/octet-stream`
const CONTENT_TYPES: &[(&str, &str)] = &[
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("svg", "image/svg+xml"),
    ("mp4", "video/mp4"),
    ("mov", "video/quicktime"),
    ("webm", "video/webm"),
    ("mp3", "audio/mpeg"),
    ("pdf", "application/pdf"),
    ("json", "application/json"),
    ("txt", "text/plain"),
    ("csv", "text/csv"),
    ("html", "text/html"),
    ("zip", "application/zip"),
];

/// Pick the Content-Type an upload URL is bound to from the file extension
pub fn detect_content_type(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(|ext| {
            CONTENT_TYPES
                .iter()
                .find(|(known, _)| ext.eq_ignore_ascii_case(known))
        })
        .map_or("application/octet-stream", |&(_, content_type)| content_type)
        .to_string()
}

/// Build a collision-resistant upload key: `<prefix>/<slug>-<unix millis>.<ext>`
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use s3presign::s3::unique_upload_key;
///
/// let now = Utc.timestamp_millis_opt(1750819242059).unwrap();
/// assert_eq!(
///     unique_upload_key("uploads/user-uploads", "My Image.PNG", now),
///     "uploads/user-uploads/my-image-1750819242059.png"
/// );
/// ```
pub fn unique_upload_key(prefix: &str, filename: &str, now: DateTime<Utc>) -> String {
    let path = Path::new(filename);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .map(slugify)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "upload".to_string());
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default();

    let name = format!("{}-{}{}", stem, now.timestamp_millis(), ext);
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        name
    } else {
        format!("{}/{}", prefix, name)
    }
}

/// Parse `key1=value1,key2=value2` into a sorted map
///
/// An empty string yields no metadata; a pair without a name or value is an
/// error rather than being skipped, since it would otherwise go unsigned.
///
/// # Examples
///
/// ```
/// use s3presign::s3::parse_metadata;
///
/// let metadata = parse_metadata("author=John,project=Demo").unwrap();
/// assert_eq!(metadata.get("author"), Some(&"John".to_string()));
/// assert!(parse_metadata("author").is_err());
/// ```
///
/// # Errors
///
/// Returns `PresignError::InvalidInput` for a malformed pair
pub fn parse_metadata(metadata_str: &str) -> Result<BTreeMap<String, String>> {
    if metadata_str.trim().is_empty() {
        return Ok(BTreeMap::new());
    }

    metadata_str
        .split(',')
        .map(|pair| -> Result<(String, String)> {
            let (key, value) = pair
                .split_once('=')
                .map(|(k, v)| (k.trim(), v.trim()))
                .filter(|(k, v)| !k.is_empty() && !v.is_empty())
                .ok_or_else(|| {
                    PresignError::invalid(
                        "metadata",
                        format!("'{}' is not a key=value pair", pair.trim()),
                    )
                })?;
            Ok((key.to_string(), value.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::path::PathBuf;

    #[test]
    fn test_detect_content_type() {
        assert_eq!(detect_content_type(&PathBuf::from("photo.jpg")), "image/jpeg");
        assert_eq!(detect_content_type(&PathBuf::from("myimage.png")), "image/png");
        assert_eq!(detect_content_type(&PathBuf::from("SHOUTING.PNG")), "image/png");
        assert_eq!(detect_content_type(&PathBuf::from("clip.mov")), "video/quicktime");
    }

    #[test]
    fn test_detect_content_type_unknown() {
        assert_eq!(
            detect_content_type(&PathBuf::from("file.unknown")),
            "application/octet-stream"
        );
        assert_eq!(
            detect_content_type(&PathBuf::from("no_extension")),
            "application/octet-stream"
        );
    }

    #[test]
    fn test_unique_upload_key() {
        let now = Utc.timestamp_millis_opt(1750819242059).unwrap();
        assert_eq!(
            unique_upload_key("uploads/user-uploads", "myimage.png", now),
            "uploads/user-uploads/myimage-1750819242059.png"
        );
        assert_eq!(
            unique_upload_key("/uploads/", "report.pdf", now),
            "uploads/report-1750819242059.pdf"
        );
        assert_eq!(unique_upload_key("", "notes", now), "notes-1750819242059");
        assert_eq!(unique_upload_key("", "???.txt", now), "upload-1750819242059.txt");
    }

    #[test]
    fn test_unique_upload_key_changes_over_time() {
        let a = Utc.timestamp_millis_opt(1750819242059).unwrap();
        let b = Utc.timestamp_millis_opt(1750819242060).unwrap();
        assert_ne!(
            unique_upload_key("uploads", "myimage.png", a),
            unique_upload_key("uploads", "myimage.png", b)
        );
    }

    #[test]
    fn test_parse_metadata() {
        let metadata = parse_metadata("author=John Doe, project=Demo,version=1.0").unwrap();

        assert_eq!(metadata.len(), 3);
        assert_eq!(metadata.get("author"), Some(&"John Doe".to_string()));
        assert_eq!(metadata.get("project"), Some(&"Demo".to_string()));
        assert_eq!(metadata.get("version"), Some(&"1.0".to_string()));
        assert!(parse_metadata("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_metadata_malformed_pair_is_an_error() {
        for bad in ["author", "author=John,invalid", "project=", "=value", "a=b,,c=d"] {
            let err = parse_metadata(bad).unwrap_err();
            assert!(
                matches!(err, PresignError::InvalidInput { field: "metadata", .. }),
                "{bad}"
            );
        }
    }
}
