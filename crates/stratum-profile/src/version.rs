use crate::ResolutionError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Product version with numeric major/minor components.
///
/// Versions are compared numerically, not lexicographically: "2.10" orders
/// above "2.4". Only the first two components participate in ordering; the
/// raw string is preserved for display and serialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProductVersion {
    raw: String,
    major: u32,
    minor: u32,
}

impl ProductVersion {
    pub fn parse(raw: &str) -> Result<Self, ResolutionError> {
        let mut parts = raw.split('.');
        let major = parts
            .next()
            .and_then(|p| p.parse::<u32>().ok())
            .ok_or_else(|| ResolutionError::InvalidVersion(raw.to_owned()))?;
        let minor = match parts.next() {
            Some(p) => p
                .parse::<u32>()
                .map_err(|_| ResolutionError::InvalidVersion(raw.to_owned()))?,
            None => 0,
        };
        Ok(Self {
            raw: raw.to_owned(),
            major,
            minor,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Numeric comparison against a major.minor threshold.
    pub fn at_least(&self, major: u32, minor: u32) -> bool {
        (self.major, self.minor) >= (major, minor)
    }

    /// The 2.4 family boundary: selects the modern module and include layout.
    pub fn is_modern(&self) -> bool {
        self.at_least(2, 4)
    }
}

impl FromStr for ProductVersion {
    type Err = ResolutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ProductVersion {
    type Error = ResolutionError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<ProductVersion> for String {
    fn from(v: ProductVersion) -> Self {
        v.raw
    }
}

impl fmt::Display for ProductVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
