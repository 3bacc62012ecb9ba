//! Engine configuration surface (spec.md §6).
//!
//! Mirrors the teacher's `RadioModuleConfig` (`simulation/types.rs`): a
//! plain, `serde`-deserializable struct set once at construction, validated
//! with a dedicated `validate()` pass (teacher: `common/scene.rs`'s
//! `validate_scene`) rather than inline panics.

use embassy_time::Duration;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// All tunables set once at engine construction. Runtime changes require a
/// round-state reset (spec.md §6).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Bytes per page. Must be a multiple of `packet_size`.
    pub page_size: u32,
    /// Bytes per packet.
    pub packet_size: u32,

    /// Lower bound of the round window, in milliseconds.
    pub t_min_ms: u64,
    /// Upper bound of the round window, in milliseconds.
    pub t_max_ms: u64,
    /// Suppression threshold for similar-summary ADVs.
    pub k: u32,
    /// REQ jitter window, in milliseconds.
    pub t_r_ms: u64,
    /// Per-frame transmission budget, in milliseconds.
    pub t_tx_ms: u64,
    /// REQ-round length, in units of `t_tx`.
    pub w: u32,
    /// REQ attempts before giving up on a page.
    pub rx_max: u32,
    /// Per-frame pacing delay during TX drain, in milliseconds.
    pub frame_delay_ms: u64,

    /// Datalink forwarding TTL budget for locally originated frames.
    pub ttl: u8,
    /// Number of recent `(source, message_id)` buffers datalink retains.
    pub buffer_window: u8,
}

impl EngineConfig {
    /// Defaults lifted verbatim from spec.md §4.6 "Parameters (defaults)".
    pub fn with_defaults(page_size: u32, packet_size: u32) -> Self {
        EngineConfig {
            page_size,
            packet_size,
            t_min_ms: 1_000,
            t_max_ms: 600_000,
            k: 1,
            t_r_ms: 500,
            t_tx_ms: 200,
            w: 10,
            rx_max: 2,
            frame_delay_ms: 20,
            ttl: 4,
            buffer_window: 10,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.packet_size == 0 {
            return Err(ConfigError::ZeroPacketSize);
        }
        if self.page_size % self.packet_size != 0 {
            return Err(ConfigError::PageNotMultipleOfPacket {
                page_size: self.page_size,
                packet_size: self.packet_size,
            });
        }
        if self.t_min_ms > self.t_max_ms {
            return Err(ConfigError::TMinAfterTMax {
                t_min_ms: self.t_min_ms,
                t_max_ms: self.t_max_ms,
            });
        }
        if self.k == 0 {
            return Err(ConfigError::ZeroSuppressionThreshold);
        }
        if self.w == 0 {
            return Err(ConfigError::ZeroRound { field: "w" });
        }
        if self.rx_max == 0 {
            return Err(ConfigError::ZeroRound { field: "rx_max" });
        }
        Ok(())
    }

    pub fn packets_per_page(&self) -> u32 {
        self.page_size / self.packet_size
    }

    pub fn t_min(&self) -> Duration {
        Duration::from_millis(self.t_min_ms)
    }

    pub fn t_max(&self) -> Duration {
        Duration::from_millis(self.t_max_ms)
    }

    pub fn t_r(&self) -> Duration {
        Duration::from_millis(self.t_r_ms)
    }

    pub fn t_tx(&self) -> Duration {
        Duration::from_millis(self.t_tx_ms)
    }

    pub fn frame_delay(&self) -> Duration {
        Duration::from_millis(self.frame_delay_ms)
    }

    pub fn req_round_window(&self) -> Duration {
        self.t_tx() * self.w
    }
}
