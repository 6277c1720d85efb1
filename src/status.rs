//! Status Reporter.

use crate::engine::EngineHandle;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Ready,
    Failed,
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusKind::Ready => f.write_str("ready"),
            StatusKind::Failed => f.write_str("failed"),
        }
    }
}

/// Whether the engine initialised at service startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub initialized: bool,
    pub status: StatusKind,
    pub message: String,
}

/// Report the state of `handle`. No side effects.
pub fn status(handle: &EngineHandle) -> ServiceStatus {
    match handle.engine() {
        Ok(engine) => ServiceStatus {
            initialized: true,
            status: StatusKind::Ready,
            message: format!("Conversion engine '{}' is ready", engine.name()),
        },
        Err(_) => ServiceStatus {
            initialized: false,
            status: StatusKind::Failed,
            message: format!(
                "Conversion engine failed to initialise: {}",
                handle.failure_reason().unwrap_or("unknown error")
            ),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_handle_reports_failed() {
        let s = status(&EngineHandle::failed("marker_single not found"));
        assert!(!s.initialized);
        assert_eq!(s.status, StatusKind::Failed);
        assert!(s.message.contains("marker_single not found"));
    }

    #[test]
    fn status_serialises_lowercase() {
        let s = ServiceStatus {
            initialized: true,
            status: StatusKind::Ready,
            message: "ok".into(),
        };
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["status"], "ready");
        assert_eq!(json["initialized"], true);
    }
}
