//! C2: datalink layer — fragmentation/reassembly, forwarding, suppression.
//!
//! Wire format and reassembly strategy are lifted from `net/layers/datalink.py`'s
//! `DataLinkPDU`/`DataLink`: a fixed 14-byte header (`source_addr: u16,
//! dest_addr: u16, message_id: u8, ttl: u8, total_size: u32, piece_no: u32`,
//! `struct.calcsize("HHBBII")`) followed by up to `MAX_DATA_SIZE` bytes of
//! payload. `struct.pack`/`unpack` here carry no byte-order prefix, which
//! means native order — little-endian on every platform this protocol
//! actually runs on — so every multi-byte field is encoded little-endian to
//! stay bit-exact with the reference implementation. Grounded on the
//! teacher's sparse-map reassembly style in `common/connection_matrix.rs`
//! (`HashMap`-keyed incremental parser) generalized to a per-source,
//! per-message piece table.

use std::collections::HashMap;

use crate::addr::NodeAddr;
use crate::error::DatalinkError;
use crate::radio::MAX_FRAME_LEN;

/// Size of the fixed datalink header, in bytes.
pub const HEADER_SIZE: usize = 14;
/// Largest payload chunk a single frame can carry after the header.
pub const MAX_DATA_SIZE: usize = MAX_FRAME_LEN - HEADER_SIZE;

/// A single datalink frame, header plus chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub source_addr: NodeAddr,
    pub dest_addr: NodeAddr,
    pub message_id: u8,
    pub ttl: u8,
    pub total_size: u32,
    pub piece_no: u32,
    pub chunk: Vec<u8>,
}

impl Frame {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE + self.chunk.len());
        out.extend_from_slice(&self.source_addr.0.to_le_bytes());
        out.extend_from_slice(&self.dest_addr.0.to_le_bytes());
        out.push(self.message_id);
        out.push(self.ttl);
        out.extend_from_slice(&self.total_size.to_le_bytes());
        out.extend_from_slice(&self.piece_no.to_le_bytes());
        out.extend_from_slice(&self.chunk);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Frame, DatalinkError> {
        if bytes.len() < HEADER_SIZE {
            return Err(DatalinkError::TooShort { len: bytes.len() });
        }
        let source_addr = NodeAddr(u16::from_le_bytes([bytes[0], bytes[1]]));
        let dest_addr = NodeAddr(u16::from_le_bytes([bytes[2], bytes[3]]));
        let message_id = bytes[4];
        let ttl = bytes[5];
        let total_size = u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]);
        let piece_no = u32::from_le_bytes([bytes[10], bytes[11], bytes[12], bytes[13]]);
        let chunk = bytes[HEADER_SIZE..].to_vec();
        if total_size == 0 && !chunk.is_empty() {
            return Err(DatalinkError::InconsistentLength);
        }
        Ok(Frame {
            source_addr,
            dest_addr,
            message_id,
            ttl,
            total_size,
            piece_no,
            chunk,
        })
    }
}

/// Splits `payload` into the frames needed to deliver it in one datalink
/// message, addressed to `dest`, originated by `source` with `message_id`,
/// at the given `ttl`.
pub fn fragment(
    source: NodeAddr,
    dest: NodeAddr,
    message_id: u8,
    ttl: u8,
    payload: &[u8],
) -> Vec<Frame> {
    if payload.is_empty() {
        return vec![Frame {
            source_addr: source,
            dest_addr: dest,
            message_id,
            ttl,
            total_size: 0,
            piece_no: 0,
            chunk: Vec::new(),
        }];
    }
    payload
        .chunks(MAX_DATA_SIZE)
        .enumerate()
        .map(|(piece_no, chunk)| Frame {
            source_addr: source,
            dest_addr: dest,
            message_id,
            ttl,
            total_size: payload.len() as u32,
            piece_no: piece_no as u32,
            chunk: chunk.to_vec(),
        })
        .collect()
}

/// Key identifying a single in-flight multi-piece message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct MessageKey {
    source: NodeAddr,
    message_id: u8,
}

struct PartialMessage {
    total_size: u32,
    pieces: HashMap<u32, Vec<u8>>,
    received_bytes: usize,
}

/// Tracks seen `(source, message_id)` pairs for forward-suppression and
/// in-progress reassembly of fragmented messages. Owns a bounded eviction
/// window over recent messages, mirroring `DataLink._clear_buffer`'s rolling
/// retention of the last `buffer_window` message ids per source.
pub struct Reassembler {
    buffer_window: usize,
    partials: HashMap<MessageKey, PartialMessage>,
    seen_order: Vec<MessageKey>,
    seen: HashMap<NodeAddr, Vec<u8>>,
}

impl Reassembler {
    pub fn new(buffer_window: usize) -> Self {
        Reassembler {
            buffer_window,
            partials: HashMap::new(),
            seen_order: Vec::new(),
            seen: HashMap::new(),
        }
    }

    /// True if `(source, message_id)` has already been accepted (fully
    /// reassembled or currently in progress) within the retention window.
    pub fn has_seen(&self, source: NodeAddr, message_id: u8) -> bool {
        self.partials.contains_key(&MessageKey {
            source,
            message_id,
        }) || self
            .seen
            .get(&source)
            .is_some_and(|ids| ids.contains(&message_id))
    }

    fn mark_seen(&mut self, key: MessageKey) {
        self.seen.entry(key.source).or_default().push(key.message_id);
        self.seen_order.push(key);
        if self.seen_order.len() > self.buffer_window {
            let evicted = self.seen_order.remove(0);
            if let Some(ids) = self.seen.get_mut(&evicted.source) {
                ids.retain(|&id| id != evicted.message_id);
                if ids.is_empty() {
                    self.seen.remove(&evicted.source);
                }
            }
            self.partials.remove(&evicted);
        }
    }

    /// Feeds one received frame into the reassembler. Returns the fully
    /// reassembled payload the first time the message completes; returns
    /// `None` for every other piece (including duplicates and pieces of an
    /// already-completed message).
    pub fn accept(&mut self, frame: &Frame) -> Option<Vec<u8>> {
        let key = MessageKey {
            source: frame.source_addr,
            message_id: frame.message_id,
        };

        if frame.total_size == 0 {
            if self.has_seen(frame.source_addr, frame.message_id) {
                return None;
            }
            self.mark_seen(key);
            return Some(Vec::new());
        }

        if self.seen.get(&key.source).is_some_and(|ids| ids.contains(&key.message_id)) {
            return None;
        }

        let entry = self.partials.entry(key).or_insert_with(|| PartialMessage {
            total_size: frame.total_size,
            pieces: HashMap::new(),
            received_bytes: 0,
        });

        if let std::collections::hash_map::Entry::Vacant(slot) =
            entry.pieces.entry(frame.piece_no)
        {
            entry.received_bytes += frame.chunk.len();
            slot.insert(frame.chunk.clone());
        }

        if entry.received_bytes < entry.total_size as usize {
            return None;
        }

        let total_size = entry.total_size;
        let piece_count = entry.pieces.len() as u32;
        let mut payload = Vec::with_capacity(total_size as usize);
        for piece_no in 0..piece_count {
            match entry.pieces.get(&piece_no) {
                Some(chunk) => payload.extend_from_slice(chunk),
                None => return None,
            }
        }
        self.partials.remove(&key);
        self.mark_seen(key);
        Some(payload)
    }
}

/// Decides whether a received frame should be rebroadcast, and returns the
/// frame with its TTL decremented if so. Mirrors `DataLink._maybe_forward_data`
/// exactly: forward unless the destination is the broadcast sentinel, the
/// destination is us, or the TTL is exhausted — this includes forwarding
/// plain unicast addressed to some third node, not just FLOOD traffic.
pub fn maybe_forward(self_addr: NodeAddr, frame: &Frame) -> Option<Frame> {
    if frame.source_addr == self_addr {
        return None;
    }
    if frame.dest_addr == NodeAddr::BROADCAST {
        return None;
    }
    if frame.dest_addr == self_addr {
        return None;
    }
    if frame.ttl == 0 {
        return None;
    }
    let mut forwarded = frame.clone();
    forwarded.ttl -= 1;
    Some(forwarded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let frame = Frame {
            source_addr: NodeAddr(1),
            dest_addr: NodeAddr::FLOOD,
            message_id: 7,
            ttl: 4,
            total_size: 3,
            piece_no: 0,
            chunk: vec![1, 2, 3],
        };
        let encoded = frame.encode();
        assert_eq!(encoded.len(), HEADER_SIZE + 3);
        assert_eq!(Frame::decode(&encoded).unwrap(), frame);
    }

    #[test]
    fn decode_rejects_short_buffer() {
        assert!(matches!(
            Frame::decode(&[0u8; 4]),
            Err(DatalinkError::TooShort { len: 4 })
        ));
    }

    #[test]
    fn fragment_and_reassemble_multi_piece_message() {
        let payload: Vec<u8> = (0..250u32).map(|i| (i % 256) as u8).collect();
        let frames = fragment(NodeAddr(1), NodeAddr::FLOOD, 5, 4, &payload);
        assert!(frames.len() > 1);

        let mut reassembler = Reassembler::new(10);
        let mut result = None;
        for frame in &frames {
            result = reassembler.accept(frame);
        }
        assert_eq!(result, Some(payload));
    }

    #[test]
    fn duplicate_piece_does_not_double_count() {
        let payload = vec![9u8; 10];
        let mut frames = fragment(NodeAddr(1), NodeAddr::FLOOD, 1, 4, &payload);
        frames.push(frames[0].clone());
        let mut reassembler = Reassembler::new(10);
        let mut completions = 0;
        for frame in &frames {
            if reassembler.accept(frame).is_some() {
                completions += 1;
            }
        }
        assert_eq!(completions, 1);
    }

    #[test]
    fn empty_payload_completes_immediately() {
        let frames = fragment(NodeAddr(1), NodeAddr::FLOOD, 2, 4, &[]);
        assert_eq!(frames.len(), 1);
        let mut reassembler = Reassembler::new(10);
        assert_eq!(reassembler.accept(&frames[0]), Some(Vec::new()));
        assert_eq!(reassembler.accept(&frames[0]), None);
    }

    #[test]
    fn forwarding_decrements_ttl_and_stops_at_zero() {
        let frame = Frame {
            source_addr: NodeAddr(2),
            dest_addr: NodeAddr::FLOOD,
            message_id: 1,
            ttl: 1,
            total_size: 0,
            piece_no: 0,
            chunk: Vec::new(),
        };
        let forwarded = maybe_forward(NodeAddr(9), &frame).expect("should forward once");
        assert_eq!(forwarded.ttl, 0);
        assert!(maybe_forward(NodeAddr(9), &forwarded).is_none());
    }

    #[test]
    fn forwarding_ignores_own_originated_frame() {
        let frame = Frame {
            source_addr: NodeAddr(9),
            dest_addr: NodeAddr::FLOOD,
            message_id: 1,
            ttl: 4,
            total_size: 0,
            piece_no: 0,
            chunk: Vec::new(),
        };
        assert!(maybe_forward(NodeAddr(9), &frame).is_none());
    }

    #[test]
    fn forwarding_relays_direct_unicast_to_others() {
        let frame = Frame {
            source_addr: NodeAddr(2),
            dest_addr: NodeAddr(3),
            message_id: 1,
            ttl: 4,
            total_size: 0,
            piece_no: 0,
            chunk: Vec::new(),
        };
        let forwarded = maybe_forward(NodeAddr(9), &frame).expect("unicast to a third node is relayed");
        assert_eq!(forwarded.ttl, 3);
    }

    #[test]
    fn forwarding_ignores_broadcast_sentinel() {
        let frame = Frame {
            source_addr: NodeAddr(2),
            dest_addr: NodeAddr::BROADCAST,
            message_id: 1,
            ttl: 4,
            total_size: 0,
            piece_no: 0,
            chunk: Vec::new(),
        };
        assert!(maybe_forward(NodeAddr(9), &frame).is_none());
    }

    #[test]
    fn forwarding_ignores_frames_addressed_to_self() {
        let frame = Frame {
            source_addr: NodeAddr(2),
            dest_addr: NodeAddr(9),
            message_id: 1,
            ttl: 4,
            total_size: 0,
            piece_no: 0,
            chunk: Vec::new(),
        };
        assert!(maybe_forward(NodeAddr(9), &frame).is_none());
    }

    #[test]
    fn eviction_window_forgets_oldest_message() {
        let mut reassembler = Reassembler::new(2);
        for id in 0..3u8 {
            let frames = fragment(NodeAddr(1), NodeAddr::FLOOD, id, 4, &[]);
            reassembler.accept(&frames[0]);
        }
        assert!(!reassembler.has_seen(NodeAddr(1), 0));
        assert!(reassembler.has_seen(NodeAddr(1), 1));
        assert!(reassembler.has_seen(NodeAddr(1), 2));
    }
}
