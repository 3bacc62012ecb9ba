//! Wire encoding of the three Deluge PDU types, bit-exact against
//! `original_source/app/protocol/deluge.py`'s `DelugePDU`, generalized so a
//! single representation serves both the classic and rateless codecs (spec.md
//! §9 "Protocol polymorphism"): `ReqPdu`/`DataPdu` carry an opaque trailing
//! `extra` payload that each [`super::codec::PageCodec`] interprets for
//! itself, since the two variants genuinely disagree on what a REQ/DATA body
//! contains (explicit missing-packet list vs. a packet count; raw packet vs.
//! coded row).
//!
//! A single leading tag byte (`ADV = 0, REQ = 1, DATA = 2`) identifies which
//! variant follows, since all three share one inbound channel.

use crate::addr::NodeAddr;
use crate::error::PduError;
use crate::hash::DATA_HASH_SIZE;

const TAG_ADV: u8 = 0;
const TAG_REQ: u8 = 1;
const TAG_DATA: u8 = 2;

/// `version, largest_completed_page, total_pages` (12 bytes) followed by the
/// 7-byte data hash and a trailing list of known-completed neighbour
/// addresses, piggybacked the way the original's `known_completed` list is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvPdu {
    pub version: u32,
    pub largest_completed_page: u32,
    pub total_pages: u32,
    pub data_hash: [u8; DATA_HASH_SIZE],
    pub known_completed: Vec<NodeAddr>,
}

/// `request_from, version, page_number` common header, plus an
/// `extra` payload the codec alone understands (missing-packet indices for
/// classic Deluge, a packet count for Rateless Deluge).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReqPdu {
    pub request_from: NodeAddr,
    pub version: u32,
    pub page_number: u32,
    pub extra: Vec<u8>,
}

/// `version, page_number` common header, plus an `extra` payload the codec
/// alone understands (packet number + raw bytes for classic Deluge,
/// coefficient row + coded bytes for Rateless Deluge).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPdu {
    pub version: u32,
    pub page_number: u32,
    pub extra: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pdu {
    Adv(AdvPdu),
    Req(ReqPdu),
    Data(DataPdu),
}

impl Pdu {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Pdu::Adv(adv) => {
                let mut out = vec![TAG_ADV];
                out.extend_from_slice(&adv.version.to_le_bytes());
                out.extend_from_slice(&adv.largest_completed_page.to_le_bytes());
                out.extend_from_slice(&adv.total_pages.to_le_bytes());
                out.extend_from_slice(&adv.data_hash);
                for addr in &adv.known_completed {
                    out.extend_from_slice(&addr.0.to_le_bytes());
                }
                out
            }
            Pdu::Req(req) => {
                let mut out = vec![TAG_REQ];
                out.extend_from_slice(&req.request_from.0.to_le_bytes());
                out.extend_from_slice(&req.version.to_le_bytes());
                out.extend_from_slice(&req.page_number.to_le_bytes());
                out.extend_from_slice(&req.extra);
                out
            }
            Pdu::Data(data) => {
                let mut out = vec![TAG_DATA];
                out.extend_from_slice(&data.version.to_le_bytes());
                out.extend_from_slice(&data.page_number.to_le_bytes());
                out.extend_from_slice(&data.extra);
                out
            }
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Pdu, PduError> {
        let Some((&tag, rest)) = bytes.split_first() else {
            return Err(PduError::TooShort { len: 0 });
        };
        match tag {
            TAG_ADV => {
                if rest.len() < 12 + DATA_HASH_SIZE {
                    return Err(PduError::TooShort { len: bytes.len() });
                }
                let version = u32::from_le_bytes(rest[0..4].try_into().unwrap());
                let largest_completed_page = u32::from_le_bytes(rest[4..8].try_into().unwrap());
                let total_pages = u32::from_le_bytes(rest[8..12].try_into().unwrap());
                let mut data_hash = [0u8; DATA_HASH_SIZE];
                data_hash.copy_from_slice(&rest[12..12 + DATA_HASH_SIZE]);
                let known_bytes = &rest[12 + DATA_HASH_SIZE..];
                let known_completed = known_bytes
                    .chunks_exact(2)
                    .map(|pair| NodeAddr(u16::from_le_bytes([pair[0], pair[1]])))
                    .collect();
                Ok(Pdu::Adv(AdvPdu {
                    version,
                    largest_completed_page,
                    total_pages,
                    data_hash,
                    known_completed,
                }))
            }
            TAG_REQ => {
                if rest.len() < 10 {
                    return Err(PduError::TooShort { len: bytes.len() });
                }
                let request_from = NodeAddr(u16::from_le_bytes([rest[0], rest[1]]));
                let version = u32::from_le_bytes(rest[2..6].try_into().unwrap());
                let page_number = u32::from_le_bytes(rest[6..10].try_into().unwrap());
                let extra = rest[10..].to_vec();
                Ok(Pdu::Req(ReqPdu {
                    request_from,
                    version,
                    page_number,
                    extra,
                }))
            }
            TAG_DATA => {
                if rest.len() < 8 {
                    return Err(PduError::TooShort { len: bytes.len() });
                }
                let version = u32::from_le_bytes(rest[0..4].try_into().unwrap());
                let page_number = u32::from_le_bytes(rest[4..8].try_into().unwrap());
                let extra = rest[8..].to_vec();
                Ok(Pdu::Data(DataPdu {
                    version,
                    page_number,
                    extra,
                }))
            }
            other => Err(PduError::UnknownType { tag: other }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adv_round_trips() {
        let adv = AdvPdu {
            version: 3,
            largest_completed_page: 2,
            total_pages: 5,
            data_hash: [1, 2, 3, 4, 5, 6, 7],
            known_completed: vec![NodeAddr(1), NodeAddr(2)],
        };
        let encoded = Pdu::Adv(adv.clone()).encode();
        assert_eq!(Pdu::decode(&encoded).unwrap(), Pdu::Adv(adv));
    }

    #[test]
    fn req_round_trips_with_extra_payload() {
        let req = ReqPdu {
            request_from: NodeAddr(9),
            version: 1,
            page_number: 4,
            extra: vec![0, 3, 5, 9],
        };
        let encoded = Pdu::Req(req.clone()).encode();
        assert_eq!(Pdu::decode(&encoded).unwrap(), Pdu::Req(req));
    }

    #[test]
    fn data_round_trips_with_extra_payload() {
        let data = DataPdu {
            version: 1,
            page_number: 0,
            extra: vec![9, 9, 9, 1, 2, 3],
        };
        let encoded = Pdu::Data(data.clone()).encode();
        assert_eq!(Pdu::decode(&encoded).unwrap(), Pdu::Data(data));
    }

    #[test]
    fn decode_rejects_empty_buffer() {
        assert!(matches!(Pdu::decode(&[]), Err(PduError::TooShort { len: 0 })));
    }

    #[test]
    fn decode_rejects_unknown_tag() {
        assert!(matches!(
            Pdu::decode(&[200, 1, 2, 3]),
            Err(PduError::UnknownType { tag: 200 })
        ));
    }
}
