//! # Pipeline Configuration
//!
//! Configuration types for the decode pipeline, plus the per-stream phase
//! reported by the orchestrator.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};

/// Decode pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Name given to the decode worker thread.
    ///
    /// Default: `"media-decode"`.
    #[serde(default = "default_decode_thread_name")]
    pub decode_thread_name: String,

    /// Number of consecutive keyframe-skip re-posts after which a warning is
    /// logged. Re-posting itself is not bounded.
    ///
    /// Default: 64.
    #[serde(default = "default_keyframe_skip_warn_after")]
    pub keyframe_skip_warn_after: u32,

    /// Audio packet compaction settings.
    #[serde(default)]
    pub compactor: CompactorConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            decode_thread_name: default_decode_thread_name(),
            keyframe_skip_warn_after: default_keyframe_skip_warn_after(),
            compactor: CompactorConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| PipelineError::InvalidConfig(format!("Malformed config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.decode_thread_name.trim().is_empty() {
            return Err(PipelineError::InvalidConfig(
                "decode_thread_name must not be empty".to_string(),
            ));
        }

        if self.keyframe_skip_warn_after == 0 {
            return Err(PipelineError::InvalidConfig(
                "keyframe_skip_warn_after must be > 0".to_string(),
            ));
        }

        self.compactor.validate()
    }
}

/// Packet compactor tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactorConfig {
    /// Allocator slop tolerated per chunk, as a fraction `1 / divisor` of the
    /// packet size.
    ///
    /// Default: 8.
    #[serde(default = "default_max_slop_divisor")]
    pub max_slop_divisor: usize,

    /// Chunks are never shrunk below this many bytes to reduce slop.
    ///
    /// Default: 256.
    #[serde(default = "default_min_chunk_bytes")]
    pub min_chunk_bytes: usize,
}

impl Default for CompactorConfig {
    fn default() -> Self {
        Self {
            max_slop_divisor: default_max_slop_divisor(),
            min_chunk_bytes: default_min_chunk_bytes(),
        }
    }
}

impl CompactorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_slop_divisor == 0 {
            return Err(PipelineError::InvalidConfig(
                "compactor.max_slop_divisor must be > 0".to_string(),
            ));
        }
        if self.min_chunk_bytes == 0 {
            return Err(PipelineError::InvalidConfig(
                "compactor.min_chunk_bytes must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Default Functions (for serde)
// ============================================================================

fn default_decode_thread_name() -> String {
    "media-decode".to_string()
}

fn default_keyframe_skip_warn_after() -> u32 {
    64
}

fn default_max_slop_divisor() -> usize {
    8
}

fn default_min_chunk_bytes() -> usize {
    256
}

// ============================================================================
// Stream Phase
// ============================================================================

/// Where a stream currently is in its decode cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamPhase {
    /// No request in flight (initial state, and after a reset).
    Idle,
    /// Running backend decode calls for a request.
    Decoding,
    /// Waiting for a re-posted keyframe-skip continuation (video only).
    Skipping,
    /// A sample was handed to the callback.
    Delivering,
    /// End of stream was reported.
    Eos,
    /// The backend failed; no further decoding happens until a reset.
    Errored,
}

impl StreamPhase {
    /// Returns `true` if a request is being worked on.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Decoding | Self::Skipping)
    }

    /// Returns `true` if the stream will not advance without a reset.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Eos | Self::Errored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.decode_thread_name, "media-decode");
        assert_eq!(config.keyframe_skip_warn_after, 64);
        assert_eq!(config.compactor.max_slop_divisor, 8);
    }

    #[test]
    fn test_config_validation() {
        let mut config = PipelineConfig::default();

        config.decode_thread_name = "  ".to_string();
        assert!(config.validate().is_err());
        config.decode_thread_name = "decode".to_string();

        config.keyframe_skip_warn_after = 0;
        assert!(config.validate().is_err());
        config.keyframe_skip_warn_after = 10;

        config.compactor.max_slop_divisor = 0;
        assert!(config.validate().is_err());
        config.compactor.max_slop_divisor = 4;

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let config =
            PipelineConfig::from_json_str(r#"{"compactor": {"min_chunk_bytes": 1024}}"#).unwrap();
        assert_eq!(config.compactor.min_chunk_bytes, 1024);
        assert_eq!(config.compactor.max_slop_divisor, 8);
        assert_eq!(config.decode_thread_name, "media-decode");
    }

    #[test]
    fn test_from_json_rejects_invalid() {
        assert!(matches!(
            PipelineConfig::from_json_str(r#"{"keyframe_skip_warn_after": 0}"#),
            Err(PipelineError::InvalidConfig(_))
        ));
        assert!(PipelineConfig::from_json_str("not json").is_err());
    }

    #[test]
    fn test_stream_phase() {
        assert!(StreamPhase::Decoding.is_active());
        assert!(StreamPhase::Skipping.is_active());
        assert!(!StreamPhase::Idle.is_active());

        assert!(StreamPhase::Eos.is_terminal());
        assert!(StreamPhase::Errored.is_terminal());
        assert!(!StreamPhase::Delivering.is_terminal());
    }
}
