//! C3: transport layer — port demultiplexing above the datalink.
//!
//! Fixed 8-byte header, carried as the payload of a datalink frame:
//! `source_port:u16 | source_addr:u16 | dest_port:u16 | dest_addr:u16`,
//! mirroring `net/layers/transport.py`'s header layout. As in the datalink
//! header, `struct.pack`/`unpack` there carry no byte-order prefix, so every
//! field here is little-endian to match. The address fields here are
//! transport's own view of addressing (matched against datalink's at
//! delivery time) rather than a read of the datalink header — the two
//! layers stay independently addressable the way the original's layer
//! stack is.

use crate::addr::NodeAddr;
use crate::error::TransportError;

/// Size of the fixed transport header, in bytes.
pub const HEADER_SIZE: usize = 8;

/// Reserved port carrying Deluge control/data PDUs and, tagged
/// `FOR_APP` by [`crate::dissemination`], directly addressed application
/// messages — one shared port for both, matching the original's single
/// shared "Application" socket.
pub const PORT_DELUGE: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportHeader {
    pub source_port: u16,
    pub source_addr: NodeAddr,
    pub dest_port: u16,
    pub dest_addr: NodeAddr,
}

impl TransportHeader {
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..2].copy_from_slice(&self.source_port.to_le_bytes());
        out[2..4].copy_from_slice(&self.source_addr.0.to_le_bytes());
        out[4..6].copy_from_slice(&self.dest_port.to_le_bytes());
        out[6..8].copy_from_slice(&self.dest_addr.0.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<TransportHeader, TransportError> {
        if bytes.len() < HEADER_SIZE {
            return Err(TransportError::TooShort { len: bytes.len() });
        }
        Ok(TransportHeader {
            source_port: u16::from_le_bytes([bytes[0], bytes[1]]),
            source_addr: NodeAddr(u16::from_le_bytes([bytes[2], bytes[3]])),
            dest_port: u16::from_le_bytes([bytes[4], bytes[5]]),
            dest_addr: NodeAddr(u16::from_le_bytes([bytes[6], bytes[7]])),
        })
    }
}

/// Prefixes `payload` with the transport header.
pub fn wrap(header: &TransportHeader, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(payload);
    out
}

/// Splits a transport-layer datagram into its header and payload.
pub fn unwrap(bytes: &[u8]) -> Result<(TransportHeader, &[u8]), TransportError> {
    let header = TransportHeader::decode(bytes)?;
    Ok((header, &bytes[HEADER_SIZE..]))
}

/// Routes transport datagrams to registered ports. Mirrors the teacher's
/// `HashMap`-keyed routing in `network_task.rs` (`HashMap<u32, Node>`),
/// specialized to port numbers rather than node ids.
pub struct PortRegistry<H> {
    handlers: std::collections::HashMap<u16, H>,
}

impl<H> Default for PortRegistry<H> {
    fn default() -> Self {
        PortRegistry {
            handlers: std::collections::HashMap::new(),
        }
    }
}

impl<H> PortRegistry<H> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, port: u16, handler: H) {
        self.handlers.insert(port, handler);
    }

    pub fn handler(&self, port: u16) -> Option<&H> {
        self.handlers.get(&port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_unwrap_round_trip() {
        let header = TransportHeader {
            source_port: PORT_DELUGE,
            source_addr: NodeAddr(1),
            dest_port: PORT_DELUGE,
            dest_addr: NodeAddr::FLOOD,
        };
        let body = vec![1, 2, 3];
        let wrapped = wrap(&header, &body);
        let (decoded, rest) = unwrap(&wrapped).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(rest, body.as_slice());
    }

    #[test]
    fn unwrap_rejects_short_buffer() {
        assert!(matches!(
            unwrap(&[0u8; 3]),
            Err(TransportError::TooShort { len: 3 })
        ));
    }

    #[test]
    fn registry_looks_up_registered_port() {
        let mut registry: PortRegistry<&'static str> = PortRegistry::new();
        registry.register(PORT_DELUGE, "deluge");
        assert_eq!(registry.handler(PORT_DELUGE), Some(&"deluge"));
        assert_eq!(registry.handler(99), None);
    }
}
