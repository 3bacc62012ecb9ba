//! C7: Rateless Deluge — random linear coding over GF(256) in place of
//! explicit packet addressing. Ported from
//! `original_source/app/protocol/rateless_deluge.py`'s `RatelessDeluge`:
//! REQ carries a packet *count* rather than specific indices; DATA carries a
//! random coefficient row plus the resulting coded packet; a page completes
//! once its [`crate::linalg::LinearSystem`] reaches full rank. The original's
//! `coding.ff.Matrix.dot` combines coefficients with plain float
//! multiplication (see `coding/matrix.py`) — replaced here with exact GF(256)
//! arithmetic per spec.md §9's resolved open question.

use std::collections::{BTreeMap, HashMap};

use rand::Rng;

use crate::config::EngineConfig;
use crate::deluge::codec::PageCodec;
use crate::gf256;
use crate::linalg::LinearSystem;

#[derive(Debug, Default, Clone, Copy)]
pub struct RatelessCodec;

/// Send-side demand tracker. `_send_data` in the original walks every page
/// with outstanding demand once per outer loop ("send one packet per
/// page") before returning to the first page again; `cursor` records the
/// last page a packet was sent for, so [`RatelessCodec::pop_next`] can
/// advance to the next page in rotation instead of draining one page to
/// exhaustion before moving on.
#[derive(Debug, Default, Clone)]
pub struct RatelessPending {
    counts: BTreeMap<u32, u32>,
    cursor: Option<u32>,
}

fn next_pending_page(pending: &RatelessPending) -> Option<u32> {
    let after = pending.cursor.map_or(0, |c| c + 1);
    pending
        .counts
        .range(after..)
        .find(|(_, &count)| count > 0)
        .or_else(|| pending.counts.range(..after).find(|(_, &count)| count > 0))
        .map(|(&page, _)| page)
}

impl PageCodec for RatelessCodec {
    type PageBuffer = LinearSystem;
    type PendingWork = RatelessPending;

    fn new_buffer(&self, config: &EngineConfig) -> Self::PageBuffer {
        LinearSystem::new(config.packets_per_page() as usize, config.packet_size as usize)
    }

    fn rows_required(&self, buffer: Option<&Self::PageBuffer>, config: &EngineConfig) -> u32 {
        match buffer {
            Some(system) => system.rows_required() as u32,
            None => config.packets_per_page(),
        }
    }

    fn next_req_extra(&self, buffer: Option<&Self::PageBuffer>, config: &EngineConfig) -> Vec<u8> {
        self.rows_required(buffer, config).to_le_bytes().to_vec()
    }

    fn merge_req(&self, pending: &mut Self::PendingWork, page: u32, extra: &[u8]) {
        if extra.len() < 4 {
            return;
        }
        let requested = u32::from_le_bytes(extra[0..4].try_into().unwrap());
        let current = pending.counts.entry(page).or_insert(0);
        *current = (*current).max(requested);
    }

    fn pending_is_empty(&self, pending: &Self::PendingWork) -> bool {
        pending.counts.values().all(|&count| count == 0)
    }

    fn pop_next(
        &self,
        rng: &mut impl Rng,
        pending: &mut Self::PendingWork,
        complete: &HashMap<u32, Vec<Vec<u8>>>,
        config: &EngineConfig,
    ) -> Option<(u32, Vec<u8>)> {
        let page = next_pending_page(pending)?;
        let page_packets = complete.get(&page)?;

        let coeffs: Vec<u8> = (0..config.packets_per_page())
            .map(|_| rng.gen_range(1..=255u8))
            .collect();
        let packet_size = config.packet_size as usize;
        let mut coded = vec![0u8; packet_size];
        for (coeff, packet) in coeffs.iter().zip(page_packets) {
            for (out_byte, &in_byte) in coded.iter_mut().zip(packet) {
                *out_byte = gf256::add(*out_byte, gf256::mul(*coeff, in_byte));
            }
        }

        if let Some(count) = pending.counts.get_mut(&page) {
            *count -= 1;
        }
        pending.cursor = Some(page);

        let mut extra = coeffs;
        extra.extend_from_slice(&coded);
        Some((page, extra))
    }

    fn accept_data(&self, buffer: &mut Self::PageBuffer, extra: &[u8], config: &EngineConfig) -> bool {
        let width = config.packets_per_page() as usize;
        if extra.len() != width + config.packet_size as usize {
            return false;
        }
        let (coeffs, data) = extra.split_at(width);
        buffer.add_row(coeffs, data).unwrap_or(false)
    }

    fn finish(&self, buffer: Self::PageBuffer, _config: &EngineConfig) -> Vec<Vec<u8>> {
        buffer.solve().expect("page reached completion")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn config() -> EngineConfig {
        EngineConfig::with_defaults(20, 5)
    }

    #[test]
    fn coded_packets_eventually_solve_the_page() {
        let codec = RatelessCodec;
        let config = config();
        let mut complete = HashMap::new();
        complete.insert(0u32, vec![vec![1u8; 5], vec![2u8; 5], vec![3u8; 5], vec![4u8; 5]]);

        let mut pending = RatelessPending::default();
        codec.merge_req(&mut pending, 0, &4u32.to_le_bytes());

        let mut buffer = codec.new_buffer(&config);
        let mut rng = StdRng::seed_from_u64(1);
        while !codec.is_complete(&buffer, &config) {
            let (page, extra) = codec.pop_next(&mut rng, &mut pending, &complete, &config).unwrap();
            assert_eq!(page, 0);
            codec.accept_data(&mut buffer, &extra, &config);
            codec.merge_req(&mut pending, 0, &codec.rows_required(Some(&buffer), &config).to_le_bytes());
        }

        let solved = codec.finish(buffer, &config);
        assert_eq!(solved, *complete.get(&0).unwrap());
    }

    #[test]
    fn merge_req_takes_the_maximum_demand() {
        let codec = RatelessCodec;
        let mut pending = RatelessPending::default();
        codec.merge_req(&mut pending, 0, &2u32.to_le_bytes());
        codec.merge_req(&mut pending, 0, &5u32.to_le_bytes());
        codec.merge_req(&mut pending, 0, &1u32.to_le_bytes());
        assert_eq!(pending.counts[&0], 5);
    }

    #[test]
    fn pop_next_round_robins_across_pending_pages() {
        let codec = RatelessCodec;
        let config = config();
        let mut complete = HashMap::new();
        complete.insert(0u32, vec![vec![1u8; 5]; 4]);
        complete.insert(1u32, vec![vec![2u8; 5]; 4]);
        complete.insert(2u32, vec![vec![3u8; 5]; 4]);

        let mut pending = RatelessPending::default();
        codec.merge_req(&mut pending, 0, &3u32.to_le_bytes());
        codec.merge_req(&mut pending, 1, &3u32.to_le_bytes());
        codec.merge_req(&mut pending, 2, &3u32.to_le_bytes());

        let mut rng = StdRng::seed_from_u64(7);
        let mut order = Vec::new();
        for _ in 0..9 {
            let (page, _) = codec.pop_next(&mut rng, &mut pending, &complete, &config).unwrap();
            order.push(page);
        }

        // One packet per page per sweep, not one page drained before the next.
        assert_eq!(order, vec![0, 1, 2, 0, 1, 2, 0, 1, 2]);
    }
}
