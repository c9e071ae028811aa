//! Server versions and the thresholds that change node defaults.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ConfigError;

/// A `MAJOR.MINOR.REVISION[-QUALIFIER]` server version.
///
/// Ordering and equality consider the numeric triple only; `8.0.0-SNAPSHOT`
/// and `8.0.0` compare equal.
#[derive(Debug, Clone)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub revision: u32,
    pub qualifier: Option<String>,
}

/// First version that names the transport port setting `transport.port`.
pub const TRANSPORT_PORT_RENAME: Version = Version::new(6, 7, 0);

impl Version {
    #[must_use]
    pub const fn new(major: u32, minor: u32, revision: u32) -> Self {
        Self {
            major,
            minor,
            revision,
            qualifier: None,
        }
    }

    #[must_use]
    pub fn on_or_after(&self, other: &Self) -> bool {
        self >= other
    }

    #[must_use]
    pub fn before(&self, other: &Self) -> bool {
        self < other
    }

    fn triple(&self) -> (u32, u32, u32) {
        (self.major, self.minor, self.revision)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.triple() == other.triple()
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.triple().cmp(&other.triple())
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.revision)?;
        if let Some(qualifier) = &self.qualifier {
            write!(f, "-{qualifier}")?;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidVersion(s.to_string());
        let trimmed = s.trim();
        let (numbers, qualifier) = match trimmed.split_once('-') {
            Some((numbers, qualifier)) if !qualifier.is_empty() => {
                (numbers, Some(qualifier.to_string()))
            }
            Some(_) => return Err(invalid()),
            None => (trimmed, None),
        };

        let mut parts = numbers.split('.');
        let mut next = || -> Result<u32, ConfigError> {
            parts
                .next()
                .ok_or_else(invalid)?
                .parse::<u32>()
                .map_err(|_| invalid())
        };
        let major = next()?;
        let minor = next()?;
        let revision = next()?;
        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(Self {
            major,
            minor,
            revision,
            qualifier,
        })
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
