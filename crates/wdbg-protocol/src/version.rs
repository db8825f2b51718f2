//! Protocol versioning for safe upgrades.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Version of the tool-call wire protocol.
///
/// `major.minor`: a major bump breaks compatibility, a minor bump only adds
/// optional fields or new tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolVersion {
    pub major: u16,
    pub minor: u16,
}

impl ProtocolVersion {
    /// Current protocol version.
    pub const CURRENT: ProtocolVersion = ProtocolVersion { major: 1, minor: 0 };

    /// Creates a new ProtocolVersion.
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    /// Same major version means compatible.
    pub fn is_compatible_with(&self, other: &ProtocolVersion) -> bool {
        self.major == other.major
    }

    /// Checks compatibility with the server's version.
    pub fn check(&self) -> Result<(), VersionError> {
        if self.is_compatible_with(&Self::CURRENT) {
            Ok(())
        } else {
            Err(VersionError::Incompatible {
                got: self.to_string(),
                expected: Self::CURRENT.to_string(),
            })
        }
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Errors that can occur with version handling.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("Incompatible protocol version: got {got}, expected {expected}")]
    Incompatible { got: String, expected: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_display_and_serde() {
        assert_eq!(ProtocolVersion::new(1, 3).to_string(), "1.3");
        let json = serde_json::to_string(&ProtocolVersion::CURRENT).unwrap();
        assert_eq!(json, r#"{"major":1,"minor":0}"#);
    }

    #[test]
    fn test_check_against_current() {
        assert!(ProtocolVersion::new(1, 7).check().is_ok());
        let err = ProtocolVersion::new(2, 0).check().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Incompatible protocol version: got 2.0, expected 1.0"
        );
    }
}
