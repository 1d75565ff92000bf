// SPDX-License-Identifier: Apache-2.0

use crate::errors::ApiError;
use runlens_model::{parse_owner, parse_repo_name, ArtifactId, ArtifactRef, Owner, RepoName};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

pub const DEFAULT_RUNS_PER_PAGE: u32 = 10;
pub const MAX_RUNS_PER_PAGE: u32 = 100;

/// How an archive is turned into something the browser can load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStrategy {
    /// Extract once into the served root on disk.
    Persist,
    /// Decompress into a named in-memory cache served by the interception route.
    Cache,
    /// One opaque address per asset plus a rewritten entry document.
    Blob,
}

impl ReportStrategy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "persist" | "fs" => Some(Self::Persist),
            "cache" => Some(Self::Cache),
            "blob" => Some(Self::Blob),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Persist => "persist",
            Self::Cache => "cache",
            Self::Blob => "blob",
        }
    }
}

impl Display for ReportStrategy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Shape of the `/artifacts/{id}` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactFormat {
    /// `{ "url": ... }` pointing at a persisted extraction.
    Extract,
    /// Raw `application/zip` attachment.
    Zip,
}

impl ArtifactFormat {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "extract" | "url" => Some(Self::Extract),
            "zip" | "raw" => Some(Self::Zip),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoCoordinate {
    pub owner: Owner,
    pub repo: RepoName,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactQuery {
    pub artifact: ArtifactRef,
    pub format: Option<ArtifactFormat>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewerQuery {
    pub artifact: ArtifactRef,
    pub strategy: ReportStrategy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventsQuery {
    pub coordinate: RepoCoordinate,
    pub last_run_id: Option<u64>,
}

fn non_empty<'a>(query: &'a BTreeMap<String, String>, key: &str) -> Option<&'a str> {
    query
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.trim().is_empty())
}

/// Both `owner` and `repo` are required; either one missing is the same error.
pub fn parse_repo_coordinate(
    query: &BTreeMap<String, String>,
) -> Result<RepoCoordinate, ApiError> {
    let (Some(owner), Some(repo)) = (non_empty(query, "owner"), non_empty(query, "repo")) else {
        return Err(ApiError::missing_repo_coordinate());
    };
    repo_coordinate_from_parts(owner, repo, false)
}

pub fn repo_coordinate_from_path(owner: &str, repo: &str) -> Result<RepoCoordinate, ApiError> {
    repo_coordinate_from_parts(owner, repo, true)
}

fn repo_coordinate_from_parts(
    owner: &str,
    repo: &str,
    in_path: bool,
) -> Result<RepoCoordinate, ApiError> {
    let invalid = |name: &str, value: &str, reason: String| {
        if in_path {
            ApiError::invalid_path(name, value, &reason)
        } else {
            ApiError::invalid_param(name, value, &reason)
        }
    };
    let owner = parse_owner(owner).map_err(|e| invalid("owner", owner, e.to_string()))?;
    let repo = parse_repo_name(repo).map_err(|e| invalid("repo", repo, e.to_string()))?;
    Ok(RepoCoordinate { owner, repo })
}

pub fn parse_artifact_id_path(raw: &str) -> Result<ArtifactId, ApiError> {
    ArtifactId::parse(raw).map_err(|e| ApiError::invalid_path("artifactId", raw, &e.to_string()))
}

pub fn parse_numeric_path(name: &str, raw: &str) -> Result<u64, ApiError> {
    match raw.trim().parse::<u64>() {
        Ok(v) if v > 0 => Ok(v),
        _ => Err(ApiError::invalid_path(
            name,
            raw,
            "must be a positive integer",
        )),
    }
}

pub fn parse_artifact_query(
    artifact_id: &str,
    query: &BTreeMap<String, String>,
) -> Result<ArtifactQuery, ApiError> {
    let coordinate = parse_repo_coordinate(query)?;
    let id = parse_artifact_id_path(artifact_id)?;
    let format = match non_empty(query, "format") {
        None => None,
        Some(raw) => Some(ArtifactFormat::parse(raw).ok_or_else(|| {
            ApiError::invalid_param("format", raw, "expected one of: extract, zip")
        })?),
    };
    Ok(ArtifactQuery {
        artifact: ArtifactRef {
            id,
            owner: coordinate.owner,
            repo: coordinate.repo,
        },
        format,
    })
}

pub fn parse_viewer_query(
    artifact_id: &str,
    query: &BTreeMap<String, String>,
    default_strategy: ReportStrategy,
) -> Result<ViewerQuery, ApiError> {
    let coordinate = parse_repo_coordinate(query)?;
    let id = parse_artifact_id_path(artifact_id)?;
    let strategy = match non_empty(query, "strategy") {
        None => default_strategy,
        Some(raw) => ReportStrategy::parse(raw).ok_or_else(|| {
            ApiError::invalid_param("strategy", raw, "expected one of: persist, cache, blob")
        })?,
    };
    Ok(ViewerQuery {
        artifact: ArtifactRef {
            id,
            owner: coordinate.owner,
            repo: coordinate.repo,
        },
        strategy,
    })
}

pub fn parse_events_query(query: &BTreeMap<String, String>) -> Result<EventsQuery, ApiError> {
    let coordinate = parse_repo_coordinate(query)?;
    let last_run_id = match non_empty(query, "lastRunId") {
        None => None,
        Some(raw) => Some(
            raw.trim()
                .parse::<u64>()
                .map_err(|_| ApiError::invalid_param("lastRunId", raw, "must be an integer"))?,
        ),
    };
    Ok(EventsQuery {
        coordinate,
        last_run_id,
    })
}

pub fn parse_per_page(
    query: &BTreeMap<String, String>,
    default_value: u32,
    max_value: u32,
) -> Result<u32, ApiError> {
    let Some(raw) = non_empty(query, "per_page") else {
        return Ok(default_value);
    };
    match raw.trim().parse::<u32>() {
        Ok(v) if v >= 1 && v <= max_value => Ok(v),
        _ => Err(ApiError::invalid_param(
            "per_page",
            raw,
            &format!("must be between 1 and {max_value}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ApiErrorCode;

    fn q(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn missing_owner_or_repo_share_one_error() {
        for query in [q(&[("owner", "o")]), q(&[("repo", "r")]), q(&[("owner", " "), ("repo", "r")])] {
            let err = parse_repo_coordinate(&query).expect_err("missing");
            assert_eq!(err.code, ApiErrorCode::MissingQueryParameter);
            assert_eq!(err.message, "Missing 'owner' or 'repo' query parameter");
        }
    }

    #[test]
    fn artifact_query_validates_each_part() {
        let ok = parse_artifact_query("12", &q(&[("owner", "o"), ("repo", "r")])).expect("ok");
        assert_eq!(ok.artifact.id.get(), 12);
        assert_eq!(ok.format, None);

        let err = parse_artifact_query("nope", &q(&[("owner", "o"), ("repo", "r")]))
            .expect_err("bad id");
        assert_eq!(err.code, ApiErrorCode::InvalidQueryParameter);

        let err = parse_artifact_query("12", &q(&[("owner", "o"), ("repo", "r"), ("format", "tar")]))
            .expect_err("bad format");
        assert!(err.message.contains("format"));
    }

    #[test]
    fn viewer_strategy_defaults_and_parses() {
        let base = q(&[("owner", "o"), ("repo", "r")]);
        let v = parse_viewer_query("3", &base, ReportStrategy::Cache).expect("default");
        assert_eq!(v.strategy, ReportStrategy::Cache);
        let mut with = base.clone();
        with.insert("strategy".to_string(), "blob".to_string());
        let v = parse_viewer_query("3", &with, ReportStrategy::Cache).expect("blob");
        assert_eq!(v.strategy, ReportStrategy::Blob);
    }

    #[test]
    fn per_page_is_bounded() {
        assert_eq!(parse_per_page(&q(&[]), 10, 100).ok(), Some(10));
        assert_eq!(parse_per_page(&q(&[("per_page", "25")]), 10, 100).ok(), Some(25));
        assert!(parse_per_page(&q(&[("per_page", "0")]), 10, 100).is_err());
        assert!(parse_per_page(&q(&[("per_page", "101")]), 10, 100).is_err());
    }

    #[test]
    fn events_last_run_id_is_optional_but_numeric() {
        let e = parse_events_query(&q(&[("owner", "o"), ("repo", "r")])).expect("no id");
        assert_eq!(e.last_run_id, None);
        let e = parse_events_query(&q(&[("owner", "o"), ("repo", "r"), ("lastRunId", "77")]))
            .expect("id");
        assert_eq!(e.last_run_id, Some(77));
        assert!(parse_events_query(&q(&[("owner", "o"), ("repo", "r"), ("lastRunId", "x")])).is_err());
    }
}
