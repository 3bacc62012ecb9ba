//! Per-component error types.
//!
//! Follows the teacher's manual `Display`/`std::error::Error` style (see
//! `SceneLoadError` in the reference simulator) rather than a derive macro,
//! since the teacher's dependency graph never pulled in one.

use core::fmt;

/// A received datalink frame that could not be parsed. Never surfaced past
/// the datalink layer: malformed frames are dropped silently per spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatalinkError {
    /// Frame shorter than the fixed 12-byte header.
    TooShort { len: usize },
    /// Declared `total_size` is inconsistent with what can ever be
    /// reassembled (e.g. zero while carrying a non-empty chunk).
    InconsistentLength,
}

impl fmt::Display for DatalinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatalinkError::TooShort { len } => {
                write!(f, "frame too short to contain a header: {len} bytes")
            }
            DatalinkError::InconsistentLength => write!(f, "inconsistent frame length fields"),
        }
    }
}

impl std::error::Error for DatalinkError {}

/// A transport datagram too short to contain its fixed header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    TooShort { len: usize },
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::TooShort { len } => {
                write!(f, "transport datagram too short to contain a header: {len} bytes")
            }
        }
    }
}

impl std::error::Error for TransportError {}

/// A received Deluge PDU that could not be parsed. Never surfaced past the
/// engine's inbound handler: malformed PDUs are logged and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PduError {
    TooShort { len: usize },
    UnknownType { tag: u8 },
}

impl fmt::Display for PduError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PduError::TooShort { len } => write!(f, "PDU too short to contain a header: {len} bytes"),
            PduError::UnknownType { tag } => write!(f, "unknown PDU type tag: {tag}"),
        }
    }
}

impl std::error::Error for PduError {}

/// Errors raised while validating an [`crate::config::EngineConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    PageNotMultipleOfPacket { page_size: u32, packet_size: u32 },
    TMinAfterTMax { t_min_ms: u64, t_max_ms: u64 },
    ZeroSuppressionThreshold,
    ZeroRound { field: &'static str },
    ZeroPacketSize,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::PageNotMultipleOfPacket {
                page_size,
                packet_size,
            } => write!(
                f,
                "page_size ({page_size}) is not a multiple of packet_size ({packet_size})"
            ),
            ConfigError::TMinAfterTMax { t_min_ms, t_max_ms } => {
                write!(f, "t_min ({t_min_ms}ms) must be <= t_max ({t_max_ms}ms)")
            }
            ConfigError::ZeroSuppressionThreshold => {
                write!(f, "suppression threshold K must be >= 1")
            }
            ConfigError::ZeroRound { field } => write!(f, "{field} must be >= 1"),
            ConfigError::ZeroPacketSize => write!(f, "packet_size must be >= 1"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Errors raised by the byte-escape/padding codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// The escaped form of the input does not fit in the requested target size.
    TargetTooSmall { escaped_len: usize, target: usize },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::TargetTooSmall {
                escaped_len,
                target,
            } => write!(
                f,
                "escaped payload ({escaped_len} bytes) does not fit target size {target}"
            ),
        }
    }
}

impl std::error::Error for CodecError {}

/// Errors raised by the GF(256) linear-algebra core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinalgError {
    /// A row's coefficient vector length did not match the system's width.
    WidthMismatch { expected: usize, got: usize },
    /// `solve()` called before the system reached full rank.
    NotYetSolved,
}

impl fmt::Display for LinalgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinalgError::WidthMismatch { expected, got } => {
                write!(f, "row width mismatch: expected {expected}, got {got}")
            }
            LinalgError::NotYetSolved => write!(f, "system has not reached full rank yet"),
        }
    }
}

impl std::error::Error for LinalgError {}

/// Errors raised by a [`crate::radio::RadioDevice`] implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioError {
    PayloadTooLarge { len: usize, max: usize },
    Closed,
}

impl fmt::Display for RadioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RadioError::PayloadTooLarge { len, max } => {
                write!(f, "payload of {len} bytes exceeds max frame size {max}")
            }
            RadioError::Closed => write!(f, "radio device is closed"),
        }
    }
}

impl std::error::Error for RadioError {}
