//! C6/C7: the Deluge protocol engine, and its rateless-coded sibling.

pub mod codec;
pub mod engine;
pub mod pdu;
pub mod rateless;
pub mod state;

pub use codec::{DelugeCodec, PageCodec};
pub use engine::DelugeEngine;
pub use rateless::RatelessCodec;
pub use state::Phase;

/// Splits a full payload into pages of raw packets, padding (via the
/// escape/pad codec) up to the next page-size boundary first. Identical for
/// both the classic and rateless variants — `_split_data_into_pages_and_packets`
/// in both `deluge.py` and `rateless_deluge.py` differ only in how the
/// resulting packets are later combined for transmission, never in how the
/// payload is chunked.
pub fn split_into_pages(payload: &[u8], page_size: u32, packet_size: u32) -> Vec<Vec<Vec<u8>>> {
    let page_size = page_size as usize;
    let packet_size = packet_size as usize;

    let escaped_len = crate::message::escape(payload).len();
    let pad_to = if escaped_len % page_size == 0 && escaped_len > 0 {
        escaped_len
    } else {
        escaped_len + (page_size - escaped_len % page_size)
    };
    let pad_to = pad_to.max(page_size);
    let padded = crate::message::escape_and_pad(payload, pad_to)
        .expect("pad target computed to exactly fit the escaped payload");

    padded
        .chunks(page_size)
        .map(|page| page.chunks(packet_size).map(|p| p.to_vec()).collect())
        .collect()
}

/// Reassembles pages produced by [`split_into_pages`] back into the original
/// payload. Inverse operation used once every page is complete.
pub fn join_pages(pages: &[Vec<Vec<u8>>]) -> Vec<u8> {
    let mut padded = Vec::new();
    for page in pages {
        for packet in page {
            padded.extend_from_slice(packet);
        }
    }
    crate::message::remove_padding_and_unescape(&padded)
}
