//! Per-round protocol state, ported field-for-field from
//! `Deluge._reset_round_state`/`Deluge.__init__`.

use embassy_time::{Duration, Instant};

use crate::addr::NodeAddr;
use crate::config::EngineConfig;

/// The three states of the round state machine (`DelugeState`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Maintain,
    Rx,
    Tx,
}

/// A sighting of an overheard REQ or DATA packet relevant to the current
/// page, used by the RX-transition suppression heuristic in
/// `_process_adv`.
#[derive(Debug, Clone, Copy)]
pub struct Overheard {
    pub at: Instant,
    pub version: u32,
}

/// Everything reset by `_reset_round_state`, plus the monotonic
/// `round_generation` used to invalidate in-flight timers instead of
/// cancelling them (spec.md §9 Design Note, option ii).
pub struct RoundState {
    pub phase: Phase,
    pub round_generation: u64,

    /// Current window length, adaptively kept between `t_min` and `t_max`.
    pub t: Duration,

    /// ADVs overheard this round with a summary matching our own.
    pub adv_overheard: u32,
    /// REQ/DATA overheard so far this round.
    pub req_and_data_overheard: u32,
    /// REQ/DATA overheard during the previous round.
    pub req_and_data_overheard_buffer: u32,
    /// Useful DATA packets received last round for the page we are requesting.
    pub rx_data_rate: u32,

    /// True if something overheard this round indicated inconsistency.
    pub inconsistent: bool,

    /// The page that caused MAINTAIN -> RX, and still being requested.
    pub page_to_req: Option<u32>,
    /// Most recent node believed able to fulfil `page_to_req`.
    pub rx_source: Option<NodeAddr>,
    /// REQs sent since entering RX.
    pub rx_num_sent: u32,

    pub last_req_received: Option<(Instant, u32, NodeAddr)>,
    pub last_data_received: Option<Overheard>,
}

impl RoundState {
    pub fn new(config: &EngineConfig) -> Self {
        RoundState {
            phase: Phase::Maintain,
            round_generation: 0,
            t: config.t_max(),
            adv_overheard: 0,
            req_and_data_overheard: 0,
            req_and_data_overheard_buffer: 0,
            rx_data_rate: 0,
            inconsistent: false,
            page_to_req: None,
            rx_source: None,
            rx_num_sent: 0,
            last_req_received: None,
            last_data_received: None,
        }
    }

    /// Marks the network inconsistent and collapses the round window to its
    /// minimum, matching `_set_inconsistent`.
    pub fn set_inconsistent(&mut self, config: &EngineConfig) {
        self.inconsistent = true;
        self.t = config.t_min();
    }

    /// Doubles the round window towards `t_max` if nothing forced
    /// inconsistency this round, matching `_round_maintain`'s adaptive
    /// backoff.
    pub fn grow_window(&mut self, config: &EngineConfig) {
        if !self.inconsistent {
            self.t = core::cmp::min(self.t * 2, config.t_max());
        }
        self.inconsistent = false;
    }

    pub fn enter_rx(&mut self, page: u32, source: NodeAddr) {
        self.page_to_req = Some(page);
        self.rx_source = Some(source);
        self.rx_num_sent = 0;
        self.phase = Phase::Rx;
    }

    pub fn exit_rx(&mut self) {
        self.page_to_req = None;
        self.rx_source = None;
        self.rx_num_sent = 0;
        self.phase = Phase::Maintain;
    }

    pub fn change_state(&mut self, phase: Phase) {
        self.phase = phase;
    }

    /// Bumps the round generation, invalidating any timer scheduled against
    /// the previous generation.
    pub fn next_generation(&mut self) -> u64 {
        self.round_generation += 1;
        self.round_generation
    }
}
