use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::IngestError;

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9]+$").expect("static pattern compiles"))
}

/// A validated repository name, safe to use as a single path segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactName(String);

impl ArtifactName {
    /// Accepts only non-empty ASCII alphanumeric names.
    pub fn parse(raw: &str) -> Result<Self, IngestError> {
        if name_pattern().is_match(raw) {
            Ok(ArtifactName(raw.to_string()))
        } else {
            tracing::warn!(repo_name = raw, "Rejected repository name");
            Err(IngestError::InvalidName(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ArtifactName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
