use serde::Serialize;

/// Failure taxonomy shared by capture, extraction and sync
///
/// Local input problems never show up here: they are corrected by
/// defaulting. Remote failures are isolated to the remote path and never
/// roll back a local write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum Error {
    /// Recognition device access refused. Terminal, never retried.
    #[error("speech recognition permission denied ({0})")]
    PermissionDenied(String),

    /// Silence, timeout or any other recognition error. Retried once.
    #[error("recognition session ended ({0})")]
    TransientSessionEnd(String),

    /// Extractor unreachable or returned unusable content
    #[error("extraction failed: {0}")]
    ExtractionFailed(String),

    /// No identity, or the remote call failed
    #[error("remote store unavailable: {0}")]
    RemoteUnavailable(String),
}

/// Recognition error codes that need user intervention
const PERMISSION_CODES: [&str; 2] = ["not-allowed", "service-not-allowed"];

impl Error {
    /// Classify a recognition engine error code
    pub fn from_recognition_code(code: &str) -> Self {
        if PERMISSION_CODES.contains(&code) {
            Self::PermissionDenied(code.to_string())
        } else {
            Self::TransientSessionEnd(code.to_string())
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_codes_are_terminal() {
        assert!(Error::from_recognition_code("not-allowed").is_permission_denied());
        assert!(Error::from_recognition_code("service-not-allowed").is_permission_denied());
    }

    #[test]
    fn test_other_codes_are_transient() {
        for code in ["no-speech", "aborted", "network", "audio-capture", ""] {
            assert_eq!(
                Error::from_recognition_code(code),
                Error::TransientSessionEnd(code.to_string())
            );
        }
    }
}
