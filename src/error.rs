use std::fmt;

use thiserror::Error;

pub type Result<T, E = CaptureError> = std::result::Result<T, E>;

/// Classification of a platform capture call failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformErrorKind {
    AdapterNotFound,
    OutputNotFound,
    /// Maximum number of duplication handles already in use
    NotCurrentlyAvailable,
    /// Output mode or topology change, desktop switch, secure desktop shown
    AccessLost,
    Unsupported,
    /// The platform returned data that breaks its own contract
    ContractViolation,
    Other,
}

/// Error reported by a platform backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformError {
    pub kind: PlatformErrorKind,
    /// Native result code, 0 when there is none
    pub code: i32,
    pub message: String,
}

impl PlatformError {
    pub fn new(kind: PlatformErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: 0,
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: i32) -> Self {
        self.code = code;
        self
    }

    pub fn contract(message: impl Into<String>) -> Self {
        Self::new(PlatformErrorKind::ContractViolation, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(PlatformErrorKind::Other, message)
    }
}

impl fmt::Display for PlatformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.code != 0 {
            write!(f, "{:?} (0x{:08X}): {}", self.kind, self.code, self.message)
        } else {
            write!(f, "{:?}: {}", self.kind, self.message)
        }
    }
}

impl std::error::Error for PlatformError {}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("could not find graphics adapter {adapter}")]
    AdapterNotFound { adapter: u32 },

    #[error("could not find output {output} on adapter {adapter}")]
    OutputNotFound { adapter: u32, output: u32 },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(
        "the maximum number of desktop duplication sessions is already in use; \
         close another capture application and try again"
    )]
    DuplicationUnavailable,

    #[error("desktop duplication access lost during {operation}")]
    AccessLost {
        operation: &'static str,
        #[source]
        source: PlatformError,
    },

    #[error("desktop duplication failed during {operation}")]
    DuplicationFailure {
        operation: &'static str,
        #[source]
        source: PlatformError,
    },

    #[error("invalid frame view: {0}")]
    InvalidView(String),

    #[error("capture thread panicked")]
    ThreadPanicked,
}

impl CaptureError {
    /// Map a failed per-frame platform call
    pub fn from_platform(operation: &'static str, source: PlatformError) -> Self {
        match source.kind {
            PlatformErrorKind::AccessLost => Self::AccessLost { operation, source },
            _ => Self::DuplicationFailure { operation, source },
        }
    }

    /// Errors worth re-opening the session for
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::AccessLost { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_lost_is_transient() {
        let err = CaptureError::from_platform(
            "AcquireNextFrame",
            PlatformError::new(PlatformErrorKind::AccessLost, "mode change"),
        );
        assert!(err.is_transient());

        let err = CaptureError::from_platform("ReleaseFrame", PlatformError::other("boom"));
        assert!(!err.is_transient());
        assert!(matches!(err, CaptureError::DuplicationFailure { .. }));
    }

    #[test]
    fn platform_error_display() {
        let e = PlatformError::other("bad").with_code(0x887A0026_u32 as i32);
        assert_eq!(e.to_string(), "Other (0x887A0026): bad");
        assert_eq!(PlatformError::contract("x").to_string(), "ContractViolation: x");
    }
}
