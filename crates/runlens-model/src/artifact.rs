// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError(pub String);

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ValidationError {}

pub const OWNER_MAX_LEN: usize = 39;
pub const REPO_MAX_LEN: usize = 100;

pub fn parse_owner(input: &str) -> Result<Owner, ValidationError> {
    Owner::parse(input)
}

pub fn parse_repo_name(input: &str) -> Result<RepoName, ValidationError> {
    RepoName::parse(input)
}

pub fn parse_artifact_id(input: &str) -> Result<ArtifactId, ValidationError> {
    ArtifactId::parse(input)
}

/// Account or organization login on the hosting provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct Owner(String);

impl Owner {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let s = input.trim();
        if s.is_empty() {
            return Err(ValidationError("owner must not be empty".to_string()));
        }
        if s.len() > OWNER_MAX_LEN {
            return Err(ValidationError(format!(
                "owner exceeds max length {OWNER_MAX_LEN}"
            )));
        }
        if !s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(ValidationError(
                "owner must match [A-Za-z0-9-]+".to_string(),
            ));
        }
        if s.starts_with('-') || s.ends_with('-') {
            return Err(ValidationError(
                "owner must not start or end with '-'".to_string(),
            ));
        }
        Ok(Self(s.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Owner {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct RepoName(String);

impl RepoName {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let s = input.trim();
        if s.is_empty() {
            return Err(ValidationError("repo must not be empty".to_string()));
        }
        if s.len() > REPO_MAX_LEN {
            return Err(ValidationError(format!(
                "repo exceeds max length {REPO_MAX_LEN}"
            )));
        }
        if s == "." || s == ".." {
            return Err(ValidationError("repo must not be '.' or '..'".to_string()));
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            return Err(ValidationError(
                "repo must match [A-Za-z0-9._-]+".to_string(),
            ));
        }
        Ok(Self(s.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for RepoName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Numeric artifact id. Zero is never issued upstream and is rejected.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord,
)]
#[serde(transparent)]
pub struct ArtifactId(u64);

impl ArtifactId {
    pub fn new(value: u64) -> Result<Self, ValidationError> {
        if value == 0 {
            return Err(ValidationError("artifact id must be positive".to_string()));
        }
        Ok(Self(value))
    }

    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let s = input.trim();
        if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()) {
            return Err(ValidationError(
                "artifact id must be a positive integer".to_string(),
            ));
        }
        let value = s
            .parse::<u64>()
            .map_err(|_| ValidationError("artifact id out of range".to_string()))?;
        Self::new(value)
    }

    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl Display for ArtifactId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Repository coordinate plus artifact id; uniquely names one archive upstream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub id: ArtifactId,
    pub owner: Owner,
    pub repo: RepoName,
}

impl ArtifactRef {
    pub fn new(id: &str, owner: &str, repo: &str) -> Result<Self, ValidationError> {
        Ok(Self {
            id: parse_artifact_id(id)?,
            owner: parse_owner(owner)?,
            repo: parse_repo_name(repo)?,
        })
    }

    #[must_use]
    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    #[must_use]
    pub fn cache_name(&self) -> String {
        format!("report-{}", self.id)
    }
}

impl Display for ArtifactRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}#{}", self.owner, self.repo, self.id)
    }
}

/// Metadata the upstream reports for one artifact.
///
/// `archive_download_url` is short-lived: it is used for exactly one download
/// and never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub id: u64,
    pub name: String,
    pub size_in_bytes: u64,
    pub archive_download_url: String,
    #[serde(default)]
    pub expired: bool,
    #[serde(default)]
    pub expires_at: Option<String>,
}

impl ArtifactMetadata {
    #[must_use]
    pub fn exceeds(&self, ceiling_bytes: u64) -> bool {
        self.size_in_bytes > ceiling_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_rejects_path_like_values() {
        assert!(Owner::parse("octo-org").is_ok());
        assert!(Owner::parse("../etc").is_err());
        assert!(Owner::parse("-leading").is_err());
        assert!(Owner::parse("").is_err());
        assert!(Owner::parse(&"a".repeat(OWNER_MAX_LEN + 1)).is_err());
    }

    #[test]
    fn repo_accepts_dots_but_not_traversal() {
        assert!(RepoName::parse("my.repo_name-2").is_ok());
        assert!(RepoName::parse("..").is_err());
        assert!(RepoName::parse("a/b").is_err());
    }

    #[test]
    fn artifact_id_must_be_positive_integer() {
        assert_eq!(ArtifactId::parse("42").map(ArtifactId::get), Ok(42));
        assert!(ArtifactId::parse("0").is_err());
        assert!(ArtifactId::parse("-1").is_err());
        assert!(ArtifactId::parse("12a").is_err());
        assert!(ArtifactId::parse("99999999999999999999999").is_err());
    }

    #[test]
    fn artifact_ref_names_its_cache_by_id() {
        let r = ArtifactRef::new("7", "octo", "site").expect("artifact ref");
        assert_eq!(r.cache_name(), "report-7");
        assert_eq!(r.slug(), "octo/site");
        assert_eq!(r.to_string(), "octo/site#7");
    }
}
