//! Cache key hashing and image type inference

use sha2::{Digest, Sha256};

/// Mime type recorded when the server gives us nothing usable
pub const DEFAULT_IMAGE_MIME: &str = "image/jpeg";

/// Map a cache key (URL or logical key) to a 64-char lowercase hex token
pub fn hash_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Build a logical data key such as `xtream_live_example.com_user`
pub fn data_key(parts: &[&str]) -> String {
    parts.join("_")
}

/// Pick an image extension from the content type, then the URL, defaulting to `jpg`
pub fn infer_extension(url: &str, content_type: Option<&str>) -> &'static str {
    if let Some(ext) = content_type.and_then(extension_from_content_type) {
        return ext;
    }

    // Drop query string and fragment before looking at the path
    let path = url
        .split(['?', '#'])
        .next()
        .unwrap_or(url)
        .to_ascii_lowercase();

    if path.ends_with(".png") {
        "png"
    } else if path.ends_with(".gif") {
        "gif"
    } else if path.ends_with(".webp") {
        "webp"
    } else {
        "jpg"
    }
}

fn extension_from_content_type(content_type: &str) -> Option<&'static str> {
    let ct = content_type.to_ascii_lowercase();
    if ct.contains("png") {
        Some("png")
    } else if ct.contains("gif") {
        Some("gif")
    } else if ct.contains("webp") {
        Some("webp")
    } else if ct.contains("jpeg") || ct.contains("jpg") {
        Some("jpg")
    } else {
        None
    }
}

pub fn mime_for_extension(ext: &str) -> &'static str {
    match ext {
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => DEFAULT_IMAGE_MIME,
    }
}

/// Strip header parameters and reject non-image types
pub fn normalize_mime(content_type: Option<&str>) -> Option<String> {
    let essence = content_type?.split(';').next()?.trim().to_ascii_lowercase();
    if essence.starts_with("image/") && essence.len() > "image/".len() {
        Some(essence)
    } else {
        None
    }
}

/// Mime type to store for a fetched image
pub fn resolve_mime(content_type: Option<&str>, ext: &str) -> String {
    normalize_mime(content_type).unwrap_or_else(|| mime_for_extension(ext).to_string())
}
