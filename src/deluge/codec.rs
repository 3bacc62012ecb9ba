//! The `PageCodec` seam between the classic and rateless-coded variants
//! (spec.md §9 "Protocol polymorphism"), plus the classic implementation.
//! Ported from `Deluge`'s REQ/DATA handling in
//! `original_source/app/protocol/deluge.py`: a REQ lists missing packet
//! indices explicitly; DATA carries one raw packet, addressed by index.

use std::collections::{HashMap, HashSet};

use rand::Rng;

use crate::addr::NodeAddr;
use crate::config::EngineConfig;

/// The per-codec hooks the shared round state machine (`engine.rs`) defers
/// to wherever classic and rateless Deluge disagree: what a REQ asks for,
/// what a DATA packet carries, and how an incomplete page accumulates
/// evidence towards completion.
pub trait PageCodec {
    /// Receive-side accumulator for one incomplete page (`packet_number ->
    /// bytes` for classic, a [`crate::linalg::LinearSystem`] for rateless).
    type PageBuffer;
    /// Send-side bookkeeping of still-owed DATA packets, keyed by page.
    type PendingWork: Default;

    fn new_buffer(&self, config: &EngineConfig) -> Self::PageBuffer;

    /// Independent packets still needed to complete this page.
    fn rows_required(&self, buffer: Option<&Self::PageBuffer>, config: &EngineConfig) -> u32;

    /// Builds the REQ `extra` payload for the page currently being requested.
    fn next_req_extra(&self, buffer: Option<&Self::PageBuffer>, config: &EngineConfig) -> Vec<u8>;

    /// Merges a received REQ's demand into `pending` for `page`.
    fn merge_req(&self, pending: &mut Self::PendingWork, page: u32, extra: &[u8]);

    fn pending_is_empty(&self, pending: &Self::PendingWork) -> bool;

    /// Pops the next (page, DATA `extra` payload) to transmit, or `None` if
    /// nothing is owed.
    fn pop_next(
        &self,
        rng: &mut impl Rng,
        pending: &mut Self::PendingWork,
        complete: &HashMap<u32, Vec<Vec<u8>>>,
        config: &EngineConfig,
    ) -> Option<(u32, Vec<u8>)>;

    /// Feeds a DATA `extra` payload into `buffer`. Returns `true` if it was
    /// innovative (reduced the packets still required).
    fn accept_data(&self, buffer: &mut Self::PageBuffer, extra: &[u8], config: &EngineConfig) -> bool;

    /// True once `buffer` has accumulated a full page.
    fn is_complete(&self, buffer: &Self::PageBuffer, config: &EngineConfig) -> bool {
        self.rows_required(Some(buffer), config) == 0
    }

    /// Extracts the finished packets from a completed buffer.
    fn finish(&self, buffer: Self::PageBuffer, config: &EngineConfig) -> Vec<Vec<u8>>;
}

/// Classic Deluge: REQ names missing packet indices explicitly, DATA
/// carries one raw packet addressed by index.
#[derive(Debug, Default, Clone, Copy)]
pub struct DelugeCodec;

impl PageCodec for DelugeCodec {
    type PageBuffer = HashMap<u32, Vec<u8>>;
    type PendingWork = HashMap<u32, HashSet<u32>>;

    fn new_buffer(&self, _config: &EngineConfig) -> Self::PageBuffer {
        HashMap::new()
    }

    fn rows_required(&self, buffer: Option<&Self::PageBuffer>, config: &EngineConfig) -> u32 {
        let have = buffer.map_or(0, |b| b.len() as u32);
        config.packets_per_page() - have
    }

    fn next_req_extra(&self, buffer: Option<&Self::PageBuffer>, config: &EngineConfig) -> Vec<u8> {
        let have: HashSet<u32> = buffer.map_or_else(HashSet::new, |b| b.keys().copied().collect());
        (0..config.packets_per_page())
            .filter(|idx| !have.contains(idx))
            .map(|idx| idx as u8)
            .collect()
    }

    fn merge_req(&self, pending: &mut Self::PendingWork, page: u32, extra: &[u8]) {
        let entry = pending.entry(page).or_default();
        for &idx in extra {
            entry.insert(idx as u32);
        }
    }

    fn pending_is_empty(&self, pending: &Self::PendingWork) -> bool {
        pending.values().all(|s| s.is_empty())
    }

    fn pop_next(
        &self,
        _rng: &mut impl Rng,
        pending: &mut Self::PendingWork,
        complete: &HashMap<u32, Vec<Vec<u8>>>,
        _config: &EngineConfig,
    ) -> Option<(u32, Vec<u8>)> {
        let &page = pending.iter().find(|(_, s)| !s.is_empty())?.0;
        let idx = *pending.get(&page)?.iter().next()?;
        pending.get_mut(&page)?.remove(&idx);
        let packet = complete.get(&page)?.get(idx as usize)?;
        let mut extra = Vec::with_capacity(4 + packet.len());
        extra.extend_from_slice(&idx.to_le_bytes());
        extra.extend_from_slice(packet);
        Some((page, extra))
    }

    fn accept_data(&self, buffer: &mut Self::PageBuffer, extra: &[u8], _config: &EngineConfig) -> bool {
        if extra.len() < 4 {
            return false;
        }
        let idx = u32::from_le_bytes(extra[0..4].try_into().unwrap());
        let data = &extra[4..];
        if buffer.contains_key(&idx) {
            return false;
        }
        buffer.insert(idx, data.to_vec());
        true
    }

    fn finish(&self, buffer: Self::PageBuffer, config: &EngineConfig) -> Vec<Vec<u8>> {
        (0..config.packets_per_page())
            .map(|idx| buffer.get(&idx).cloned().expect("page reached completion"))
            .collect()
    }
}

/// Applies the teacher-style "suppress if REQ/DATA overheard" predicate used
/// for both ADV and REQ suppression (`_send_adv`/`_send_req`).
pub fn request_from_is_us(self_addr: NodeAddr, request_from: NodeAddr) -> bool {
    self_addr == request_from
}
