//! Maps stored extensions to outbound content types and cache policy.

/// Extensions accepted on upload.
pub const ACCEPTED_EXTENSIONS: [&str; 3] = [".jpg", ".jpeg", ".png"];

/// Stored objects are never rewritten in place, so every response may be
/// cached for a year.
pub const IMMUTABLE_CACHE_CONTROL: &str = "public, max-age=31536000";

/// Headers applied when serving a stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentPolicy {
    pub content_type: &'static str,
    pub cache_control: &'static str,
}

/// Trailing `.[A-Za-z0-9]+` suffix of `name`, lower-cased.
pub fn extension_of(name: &str) -> Option<String> {
    let dot = name.rfind('.')?;
    let suffix = &name[dot + 1..];
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return None;
    }
    Some(format!(".{}", suffix.to_ascii_lowercase()))
}

/// The extension of `name` if it is one we accept for storage.
pub fn accepted_extension(name: &str) -> Option<String> {
    extension_of(name).filter(|ext| ACCEPTED_EXTENSIONS.contains(&ext.as_str()))
}

pub fn resolve(extension: &str) -> ContentPolicy {
    let content_type = match extension {
        ".png" => "image/png",
        ".jpg" | ".jpeg" => "image/jpeg",
        _ => "application/octet-stream",
    };
    ContentPolicy {
        content_type,
        cache_control: IMMUTABLE_CACHE_CONTROL,
    }
}
