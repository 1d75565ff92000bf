// SPDX-License-Identifier: Apache-2.0

//! Turning a decoded report into something a browser can load.
//!
//! Three strategies share one decoder: extraction to disk, a named in-memory
//! cache served by an interception route, and per-asset blob addresses with a
//! rewritten entry document.

pub mod archive;
pub mod blob;
pub mod cache;
pub mod fs;

pub use archive::{
    decode_archive, decode_archive_blocking, ArchiveLimits, ReportAsset, ReportFiles,
};
pub use blob::{blob_id, document_asset, rewrite_entry_document, BlobSet, BlobStore};
pub use cache::{CacheKey, ReportCacheStore};
pub use fs::FsMaterializer;

/// Content type by file extension. Unknown extensions are served as opaque bytes.
#[must_use]
pub fn content_type_for_path(path: &str) -> &'static str {
    let ext = path
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js" | "mjs") => "application/javascript",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("svg") => "image/svg+xml",
        Some("webm") => "video/webm",
        Some("txt" | "log") => "text/plain; charset=utf-8",
        Some("woff2") => "font/woff2",
        Some("woff") => "font/woff",
        Some("ttf") => "font/ttf",
        _ => "application/octet-stream",
    }
}

/// Whether a content type benefits from response compression.
#[must_use]
pub fn is_compressible(content_type: &str) -> bool {
    content_type.starts_with("text/")
        || content_type.starts_with("application/javascript")
        || content_type.starts_with("application/json")
        || content_type.starts_with("image/svg+xml")
}
