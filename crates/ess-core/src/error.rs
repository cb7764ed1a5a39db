//! Error taxonomy for the alert/access pipeline.
//!
//! Every failure the pipeline can absorb has its own variant, so callers
//! branch on [`PipelineError::kind`] instead of matching message strings.
//! Only [`FaultKind::Config`] is allowed to stop a process, and only at
//! startup.

use std::path::PathBuf;

use crate::config::ConfigError;

/// Coarse classification of a [`PipelineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// Sensor could not be opened. Retried forever.
    Initialization,
    /// Sensor fault mid-capture. Forces re-initialization.
    Capture,
    /// Bus publish failed. Logged, not retried.
    Publish,
    /// Store write failed. Rolled back and dropped.
    Persistence,
    /// Bus connection lost. Reconnect after a delay.
    TransportDisconnect,
    /// Invalid configuration. Fatal at startup.
    Config,
    /// Snapshot file could not be read or written.
    SnapshotIo,
    /// Inbound message did not match its schema.
    InvalidPayload,
}

/// Errors raised inside the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The sensor could not be opened or configured.
    #[error("sensor initialization failed: {reason}")]
    Initialization {
        /// Driver-provided description.
        reason: String,
    },

    /// A frame capture failed on an open sensor.
    #[error("frame capture failed: {reason}")]
    Capture {
        /// Driver-provided description.
        reason: String,
    },

    /// The bus rejected or could not accept a publish.
    #[error("publish to {subject} failed: {reason}")]
    Publish {
        /// Subject the message was addressed to.
        subject: String,
        /// Client-provided description.
        reason: String,
    },

    /// A durable-store write failed and was rolled back.
    #[error("persistence failed: {reason}")]
    Persistence {
        /// Store-provided description.
        reason: String,
    },

    /// The bus connection dropped or could not be established.
    #[error("bus transport disconnected: {reason}")]
    TransportDisconnect {
        /// Client-provided description.
        reason: String,
    },

    /// Configuration could not be loaded or is inconsistent.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: ConfigError,
    },

    /// The snapshot file could not be read, parsed, or replaced.
    #[error("snapshot file {}: {reason}", path.display())]
    SnapshotIo {
        /// Snapshot file path.
        path: PathBuf,
        /// Description of the failure.
        reason: String,
    },

    /// An inbound message did not match its schema.
    #[error("invalid payload on {subject}: {reason}")]
    InvalidPayload {
        /// Subject the message arrived on.
        subject: String,
        /// Description of the mismatch.
        reason: String,
    },
}

impl PipelineError {
    /// Classification of this error.
    pub const fn kind(&self) -> FaultKind {
        match self {
            Self::Initialization { .. } => FaultKind::Initialization,
            Self::Capture { .. } => FaultKind::Capture,
            Self::Publish { .. } => FaultKind::Publish,
            Self::Persistence { .. } => FaultKind::Persistence,
            Self::TransportDisconnect { .. } => FaultKind::TransportDisconnect,
            Self::Config { .. } => FaultKind::Config,
            Self::SnapshotIo { .. } => FaultKind::SnapshotIo,
            Self::InvalidPayload { .. } => FaultKind::InvalidPayload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_match_variants() {
        let publish = PipelineError::Publish {
            subject: "ess.alert".to_owned(),
            reason: "no responders".to_owned(),
        };
        assert_eq!(publish.kind(), FaultKind::Publish);
        assert_eq!(publish.to_string(), "publish to ess.alert failed: no responders");

        let config = PipelineError::from(ConfigError::Invalid {
            reason: "warn_c must be below crit_c".to_owned(),
        });
        assert_eq!(config.kind(), FaultKind::Config);
    }

    #[test]
    fn snapshot_io_displays_path() {
        let err = PipelineError::SnapshotIo {
            path: PathBuf::from("/var/log/ess-thermal-status.json"),
            reason: "permission denied".to_owned(),
        };
        assert_eq!(
            err.to_string(),
            "snapshot file /var/log/ess-thermal-status.json: permission denied"
        );
    }
}
