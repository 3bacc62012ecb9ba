//! C1: Frame codec & radio adapter.
//!
//! The physical radio is treated as an opaque broadcast primitive (spec.md
//! §4.1/§6): best-effort, unordered, may duplicate or drop, with a fixed
//! maximum frame payload. This module defines the seam
//! ([`RadioDevice`]) the datalink layer is generic over, and a minimal
//! channel-backed implementation for tests — grounded on the teacher's
//! `radio_devices::simulator` pair of bounded queues
//! (`RadioInputQueue`/`RadioOutputQueue`) handed to the manager at
//! construction (`node_task.rs::NodeContext::initialize`).

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

use crate::addr::NodeAddr;
use crate::error::RadioError;

/// Maximum payload a single radio frame can carry.
pub const MAX_FRAME_LEN: usize = 100;

/// Opaque broadcast radio primitive. Implementations need not provide
/// ordering, reliability, or deduplication — every one of those concerns is
/// handled above this layer (datalink seen-set suppression, Deluge
/// suppression/retries).
pub trait RadioDevice {
    /// Broadcasts `frame` to every node in range. `frame.len() <=
    /// MAX_FRAME_LEN`.
    async fn broadcast(&self, frame: &[u8]) -> Result<(), RadioError>;

    /// Awaits the next received frame and the address it arrived from.
    async fn receive(&self) -> (Vec<u8>, NodeAddr);
}

#[cfg(any(test, feature = "testing"))]
const QUEUE_DEPTH: usize = 32;

/// A frame in flight between a [`ChannelRadioDevice`]'s broadcast and
/// receive sides, tagged with the sender's address the way a real radio's
/// link layer would report it alongside the payload.
#[cfg(any(test, feature = "testing"))]
#[derive(Debug, Clone)]
pub struct InFlightFrame {
    pub payload: Vec<u8>,
    pub sender: NodeAddr,
}

/// Channel-backed [`RadioDevice`] for tests and small in-process topologies.
/// Not a simulation harness: no loss model, no topology, no timing — it is
/// the minimal loopback/broadcast medium needed to exercise the protocol
/// stack end to end, analogous to the teacher's queue pair rather than its
/// GUI-driven airtime/collision simulator.
#[cfg(any(test, feature = "testing"))]
pub struct ChannelRadioDevice {
    self_addr: NodeAddr,
    outbound: &'static Channel<CriticalSectionRawMutex, InFlightFrame, QUEUE_DEPTH>,
    inbound: &'static Channel<CriticalSectionRawMutex, InFlightFrame, QUEUE_DEPTH>,
}

#[cfg(any(test, feature = "testing"))]
impl ChannelRadioDevice {
    /// `outbound` is where this device publishes broadcasts; `inbound` is
    /// where an external fan-out fabric delivers frames destined for this
    /// node. The caller owns wiring `outbound` of every node into the
    /// `inbound` of every other node (a test harness concern, not this
    /// module's).
    pub fn new(
        self_addr: NodeAddr,
        outbound: &'static Channel<CriticalSectionRawMutex, InFlightFrame, QUEUE_DEPTH>,
        inbound: &'static Channel<CriticalSectionRawMutex, InFlightFrame, QUEUE_DEPTH>,
    ) -> Self {
        Self {
            self_addr,
            outbound,
            inbound,
        }
    }
}

#[cfg(any(test, feature = "testing"))]
impl RadioDevice for ChannelRadioDevice {
    async fn broadcast(&self, frame: &[u8]) -> Result<(), RadioError> {
        if frame.len() > MAX_FRAME_LEN {
            return Err(RadioError::PayloadTooLarge {
                len: frame.len(),
                max: MAX_FRAME_LEN,
            });
        }
        self.outbound
            .send(InFlightFrame {
                payload: frame.to_vec(),
                sender: self.self_addr,
            })
            .await;
        Ok(())
    }

    async fn receive(&self) -> (Vec<u8>, NodeAddr) {
        let frame = self.inbound.receive().await;
        (frame.payload, frame.sender)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_oversized_broadcast() {
        static OUT: Channel<CriticalSectionRawMutex, InFlightFrame, QUEUE_DEPTH> = Channel::new();
        static IN: Channel<CriticalSectionRawMutex, InFlightFrame, QUEUE_DEPTH> = Channel::new();
        let device = ChannelRadioDevice::new(NodeAddr(1), &OUT, &IN);
        let oversized = vec![0u8; MAX_FRAME_LEN + 1];
        let result = futures::executor::block_on(device.broadcast(&oversized));
        assert!(matches!(result, Err(RadioError::PayloadTooLarge { .. })));
    }
}
