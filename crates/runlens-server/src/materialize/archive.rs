// SPDX-License-Identifier: Apache-2.0

use super::content_type_for_path;
use crate::error::ReportError;
use axum::body::Bytes;
use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::path::{Component, Path};

#[derive(Debug, Clone)]
pub struct ArchiveLimits {
    pub strip_prefix: String,
    pub entry_point: String,
    pub max_entries: usize,
    pub max_extracted_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportAsset {
    pub body: Bytes,
    pub content_type: &'static str,
}

/// Fully decoded report: relative path to asset, plus the entry document name.
#[derive(Debug, Clone)]
pub struct ReportFiles {
    files: BTreeMap<String, ReportAsset>,
    entry_point: String,
    total_bytes: u64,
}

impl ReportFiles {
    #[must_use]
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    #[must_use]
    pub fn entry_asset(&self) -> Option<&ReportAsset> {
        self.files.get(&self.entry_point)
    }

    #[must_use]
    pub fn get(&self, path: &str) -> Option<&ReportAsset> {
        self.files.get(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ReportAsset)> {
        self.files.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }
}

fn relative_name(path: &Path, raw: &str) -> Result<String, ReportError> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str().ok_or_else(|| {
                ReportError::CorruptArchive(format!("entry name is not utf-8: {raw}"))
            })?),
            Component::CurDir => {}
            _ => {
                return Err(ReportError::CorruptArchive(format!(
                    "unsafe entry path: {raw}"
                )))
            }
        }
    }
    Ok(parts.join("/"))
}

/// Decodes a zip archive into an in-memory report.
///
/// All-or-nothing: any unreadable entry, unsafe name or crossed bound fails
/// the whole decode and nothing is returned.
pub fn decode_archive(bytes: &[u8], limits: &ArchiveLimits) -> Result<ReportFiles, ReportError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ReportError::CorruptArchive(e.to_string()))?;
    if archive.len() > limits.max_entries {
        return Err(ReportError::ExtractionLimit(format!(
            "archive has {} entries, limit is {}",
            archive.len(),
            limits.max_entries
        )));
    }

    let mut files = BTreeMap::new();
    let mut total_bytes = 0_u64;
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| ReportError::CorruptArchive(e.to_string()))?;
        if entry.is_dir() {
            continue;
        }
        let raw_name = entry.name().to_string();
        let enclosed = entry
            .enclosed_name()
            .ok_or_else(|| ReportError::CorruptArchive(format!("unsafe entry path: {raw_name}")))?;
        let name = relative_name(&enclosed, &raw_name)?;
        let name = name
            .strip_prefix(limits.strip_prefix.as_str())
            .map(str::to_string)
            .unwrap_or(name);
        if name.is_empty() {
            continue;
        }

        let remaining = limits.max_extracted_bytes.saturating_sub(total_bytes);
        if entry.size() > remaining {
            return Err(ReportError::ExtractionLimit(format!(
                "decompressed content exceeds {} bytes",
                limits.max_extracted_bytes
            )));
        }
        let mut body = Vec::with_capacity(entry.size().min(16 * 1024 * 1024) as usize);
        (&mut entry)
            .take(remaining.saturating_add(1))
            .read_to_end(&mut body)
            .map_err(|e| ReportError::CorruptArchive(format!("{raw_name}: {e}")))?;
        if body.len() as u64 > remaining {
            return Err(ReportError::ExtractionLimit(format!(
                "decompressed content exceeds {} bytes",
                limits.max_extracted_bytes
            )));
        }
        total_bytes += body.len() as u64;
        let content_type = content_type_for_path(&name);
        files.insert(
            name,
            ReportAsset {
                body: Bytes::from(body),
                content_type,
            },
        );
    }

    if !files.contains_key(&limits.entry_point) {
        return Err(ReportError::MissingEntryPoint(format!(
            "archive has no {}",
            limits.entry_point
        )));
    }
    Ok(ReportFiles {
        files,
        entry_point: limits.entry_point.clone(),
        total_bytes,
    })
}

/// Runs [`decode_archive`] on the blocking pool so decompression never
/// stalls request handling.
pub async fn decode_archive_blocking(
    bytes: Vec<u8>,
    limits: ArchiveLimits,
) -> Result<ReportFiles, ReportError> {
    tokio::task::spawn_blocking(move || decode_archive(&bytes, &limits))
        .await
        .map_err(|e| ReportError::Internal(format!("archive decode task failed: {e}")))?
}
