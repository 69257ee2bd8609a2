//! Semantic version strings used to namespace attachments.

use crate::core::error::DocketError;
use regex::Regex;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Semver {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl Semver {
    /// Parse a `major.minor.patch` string, tolerating a leading `v`.
    pub fn parse(s: &str) -> Result<Semver, DocketError> {
        let re = Regex::new(r"^v?(\d+)\.(\d+)\.(\d+)$")
            .map_err(|e| DocketError::ValidationError(e.to_string()))?;
        let caps = re.captures(s.trim()).ok_or_else(|| {
            DocketError::ValidationError(format!("invalid semver: {:?}", s))
        })?;
        let field = |i: usize| -> Result<u64, DocketError> {
            caps[i]
                .parse::<u64>()
                .map_err(|e| DocketError::ValidationError(format!("invalid semver {:?}: {}", s, e)))
        };
        Ok(Semver {
            major: field(1)?,
            minor: field(2)?,
            patch: field(3)?,
        })
    }
}

impl fmt::Display for Semver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}
