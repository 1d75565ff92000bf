// SPDX-License-Identifier: Apache-2.0

use super::{ReportAsset, ReportFiles};
use crate::error::ReportError;
use axum::body::Bytes;
use regex::{Captures, Regex};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

const URL_ATTRIBUTES: &str = r#"(?i)(\s(?:src|href|poster|data-src)\s*=\s*)(?:"([^"]*)"|'([^']*)')"#;
const OPEN_TAG: &str = r"<[A-Za-z][A-Za-z0-9:-]*(?:\s[^<>]*)?/?>";
const CSS_URL: &str = r#"url\(\s*(?:"([^"]*)"|'([^']*)'|([^)"'\s]+))\s*\)"#;
const BLOB_PREFIX: &str = "/blobs/";

/// Addresses published for one viewer: the rewritten entry document and the
/// blob ids that must be released with it.
#[derive(Debug, Clone)]
pub struct BlobSet {
    pub ids: Vec<String>,
    pub addresses: BTreeMap<String, String>,
    pub document: String,
}

struct BlobEntry {
    owner_fingerprint: String,
    asset: ReportAsset,
}

/// Opaque per-asset addresses (`/blobs/{uuid}`), readable only by the
/// credential that published them.
#[derive(Default)]
pub struct BlobStore {
    blobs: RwLock<HashMap<String, BlobEntry>>,
}

impl BlobStore {
    pub async fn publish(
        &self,
        fingerprint: &str,
        files: &ReportFiles,
    ) -> Result<BlobSet, ReportError> {
        let entry = files
            .entry_asset()
            .ok_or_else(|| ReportError::MissingEntryPoint(files.entry_point().to_string()))?;
        let mut ids = Vec::with_capacity(files.len());
        let mut addresses = BTreeMap::new();
        let mut staged = Vec::with_capacity(files.len());
        for (path, asset) in files.iter() {
            if path == files.entry_point() {
                continue;
            }
            let id = uuid::Uuid::new_v4().to_string();
            addresses.insert(path.to_string(), format!("{BLOB_PREFIX}{id}"));
            staged.push((id.clone(), path, asset.clone()));
            ids.push(id);
        }
        // A stylesheet served from `/blobs/{id}` would resolve its own
        // relative `url()` references against `/blobs/`.
        let css_urls = Regex::new(CSS_URL)
            .map_err(|e| ReportError::Internal(format!("css url pattern: {e}")))?;
        let staged: Vec<(String, BlobEntry)> = staged
            .into_iter()
            .map(|(id, path, mut asset)| {
                if is_stylesheet(path) {
                    let css = String::from_utf8_lossy(&asset.body);
                    let rewritten = rewrite_stylesheet(&css, path, &css_urls, &addresses);
                    asset.body = Bytes::from(rewritten);
                }
                (
                    id,
                    BlobEntry {
                        owner_fingerprint: fingerprint.to_string(),
                        asset,
                    },
                )
            })
            .collect();
        let html = String::from_utf8_lossy(&entry.body);
        let document = rewrite_entry_document(&html, &addresses)?;

        self.blobs.write().await.extend(staged);
        Ok(BlobSet {
            ids,
            addresses,
            document,
        })
    }

    pub async fn get(&self, id: &str, fingerprint: &str) -> Option<ReportAsset> {
        self.blobs
            .read()
            .await
            .get(id)
            .filter(|b| b.owner_fingerprint == fingerprint)
            .map(|b| b.asset.clone())
    }

    /// Revokes the given addresses; returns how many were live.
    pub async fn release(&self, ids: &[String]) -> usize {
        let mut blobs = self.blobs.write().await;
        ids.iter().filter(|id| blobs.remove(*id).is_some()).count()
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }
}

fn normalize_reference(value: &str) -> (&str, &str) {
    let value = value.trim();
    let split_at = value.find(['?', '#']).unwrap_or(value.len());
    let (path, suffix) = value.split_at(split_at);
    let mut path = path;
    while let Some(rest) = path.strip_prefix("./") {
        path = rest;
    }
    let fragment = suffix.find('#').map_or("", |i| &suffix[i..]);
    (path, fragment)
}

fn is_stylesheet(path: &str) -> bool {
    path.rsplit('.')
        .next()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("css"))
}

/// Blob id behind an address handed out by [`BlobStore::publish`].
#[must_use]
pub fn blob_id(address: &str) -> Option<&str> {
    address.strip_prefix(BLOB_PREFIX).filter(|id| !id.is_empty())
}

/// Archive path a relative reference from `from` points at, or `None` when it
/// is absolute, external, or climbs above the archive root.
fn resolve_relative(from: &str, reference: &str) -> Option<String> {
    if reference.is_empty()
        || reference.starts_with('/')
        || reference.starts_with('#')
        || reference.contains(':')
    {
        return None;
    }
    let mut segments: Vec<&str> = from.split('/').collect();
    segments.pop();
    for part in reference.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            other => segments.push(other),
        }
    }
    Some(segments.join("/"))
}

/// Points `url()` references of the stylesheet at `css_path` to blob
/// addresses. Unknown, absolute and external references are left as they are.
fn rewrite_stylesheet(
    css: &str,
    css_path: &str,
    css_urls: &Regex,
    addresses: &BTreeMap<String, String>,
) -> String {
    css_urls
        .replace_all(css, |caps: &Captures<'_>| {
            let Some(value) = caps.get(1).or(caps.get(2)).or(caps.get(3)) else {
                return caps[0].to_string();
            };
            let (path, fragment) = normalize_reference(value.as_str());
            match resolve_relative(css_path, path).and_then(|p| addresses.get(&p)) {
                Some(address) => format!("url(\"{address}{fragment}\")"),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn rewrite_tag(tag: &str, attributes: &Regex, addresses: &BTreeMap<String, String>) -> String {
    attributes
        .replace_all(tag, |caps: &Captures<'_>| {
            let prefix = &caps[1];
            let (quote, value) = match (caps.get(2), caps.get(3)) {
                (Some(v), _) => ('"', v.as_str()),
                (None, Some(v)) => ('\'', v.as_str()),
                (None, None) => return caps[0].to_string(),
            };
            let (path, fragment) = normalize_reference(value);
            match addresses.get(path) {
                Some(address) => format!("{prefix}{quote}{address}{fragment}{quote}"),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn raw_text_element(tag: &str) -> Option<&'static str> {
    let name: String = tag[1..]
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();
    match name.as_str() {
        "script" => Some("script"),
        "style" => Some("style"),
        _ => None,
    }
}

/// Replaces asset references in the entry document with blob addresses.
///
/// Only `src`, `href`, `poster` and `data-src` attribute values of markup
/// tags are touched, and only when the whole value names a known asset.
/// Script and style bodies are copied verbatim, so a reference to `a.js`
/// never alters `data.js` or text that merely contains the name.
pub fn rewrite_entry_document(
    html: &str,
    addresses: &BTreeMap<String, String>,
) -> Result<String, ReportError> {
    let tags = Regex::new(OPEN_TAG)
        .map_err(|e| ReportError::Internal(format!("tag pattern: {e}")))?;
    let attributes = Regex::new(URL_ATTRIBUTES)
        .map_err(|e| ReportError::Internal(format!("attribute pattern: {e}")))?;
    let lowered = html.to_ascii_lowercase();

    let mut out = String::with_capacity(html.len());
    let mut cursor = 0;
    while let Some(found) = tags.find_at(html, cursor) {
        out.push_str(&html[cursor..found.start()]);
        out.push_str(&rewrite_tag(found.as_str(), &attributes, addresses));
        cursor = found.end();
        if let Some(element) = raw_text_element(found.as_str()) {
            let close = format!("</{element}");
            let end = lowered[cursor..]
                .find(&close)
                .map_or(html.len(), |i| cursor + i);
            out.push_str(&html[cursor..end]);
            cursor = end;
        }
    }
    out.push_str(&html[cursor..]);
    Ok(out)
}

/// Body of the rewritten entry document as served to the frame.
#[must_use]
pub fn document_asset(document: &str) -> ReportAsset {
    ReportAsset {
        body: Bytes::copy_from_slice(document.as_bytes()),
        content_type: "text/html; charset=utf-8",
    }
}
