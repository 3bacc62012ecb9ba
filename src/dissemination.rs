//! C8: application-facing dissemination wrapper around a [`DelugeEngine`].
//!
//! Mirrors `DataDissemination._handle_incoming`/`_send_to_protocol`/
//! `_send_to_app` in `original_source/app/data_dissemination.py`: every
//! message carried over the link is prefixed with a one-byte tag,
//! `FOR_PROTOCOL` for the engine's own ADV/REQ/DATA PDUs or `FOR_APP` for
//! messages an embedding application wants to exchange directly. Both share
//! [`crate::transport::PORT_DELUGE`] and the engine's own datalink
//! fragmentation/forwarding/TTL, the way the original's application and
//! protocol layers share one transport socket and the application layer
//! alone demuxes on the tag. The engine applies the tag to every outbound
//! frame and strips/demuxes it on every inbound one, handing `FOR_APP`
//! traffic to the handler installed here rather than to its own PDU
//! decoder. Construction takes both callbacks up-front the way
//! the teacher hands an owned outbound sink callback to `NodeContext` at
//! construction (`node_task.rs`'s `out_tx: NodesOutputQueueSender`) rather
//! than looping callers back through the manager.

use crate::addr::NodeAddr;
use crate::config::EngineConfig;
use crate::deluge::DelugeEngine;
use crate::deluge::codec::PageCodec;
use crate::radio::RadioDevice;

/// Tag for traffic that belongs to the Deluge engine itself.
pub const FOR_PROTOCOL: u8 = 0;
/// Tag for traffic an embedding application wants to exchange directly,
/// bypassing versioned bulk dissemination entirely.
pub const FOR_APP: u8 = 1;

pub fn wrap_for_app(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + payload.len());
    out.push(FOR_APP);
    out.extend_from_slice(payload);
    out
}

pub fn wrap_for_protocol(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + payload.len());
    out.push(FOR_PROTOCOL);
    out.extend_from_slice(payload);
    out
}

/// Splits a tagged datagram into its tag and remaining bytes.
pub fn unwrap(bytes: &[u8]) -> Option<(u8, &[u8])> {
    bytes.split_first().map(|(tag, rest)| (*tag, rest))
}

/// Owns a [`DelugeEngine`] and the two application-facing callbacks fed,
/// respectively, completed versions of the disseminated data and directly
/// addressed `FOR_APP` messages. Construction takes both callbacks
/// up-front rather than requiring callers to poll, matching the "owned
/// outbound sink" pattern used throughout the teacher's task wiring.
pub struct Dissemination<C: PageCodec, R: RadioDevice> {
    engine: DelugeEngine<C, R>,
}

impl<C: PageCodec, R: RadioDevice> Dissemination<C, R> {
    pub fn new(
        self_addr: NodeAddr,
        config: EngineConfig,
        codec: C,
        radio: R,
        stop: embassy_sync::channel::Receiver<
            'static,
            embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex,
            (),
            1,
        >,
        handle_incoming_dissemination: impl FnMut(u32, Vec<u8>) + Send + 'static,
        handle_incoming_app_message: impl FnMut(Vec<u8>, NodeAddr) + Send + 'static,
    ) -> Result<Self, crate::error::ConfigError> {
        let engine = DelugeEngine::new(self_addr, config, codec, radio, stop)?
            .with_completion_handler(handle_incoming_dissemination)
            .with_app_message_handler(handle_incoming_app_message);
        Ok(Dissemination { engine })
    }

    /// Publishes a new version of the data to disseminate.
    pub fn publish(&mut self, version: u32, data: &[u8]) {
        self.engine.new_version(version, data, false);
    }

    /// Sends an application-level message to `dest`, tagged `FOR_APP` so it
    /// rides the same link as bulk dissemination traffic without being
    /// mistaken for it.
    pub async fn send_app_message(&mut self, dest: NodeAddr, payload: &[u8]) {
        self.engine.send_app_message(dest, payload).await;
    }

    /// Runs the underlying engine's round loop until stopped.
    pub async fn run(&mut self) {
        self.engine.run().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_round_trip() {
        let wrapped = wrap_for_app(&[1, 2, 3]);
        let (tag, rest) = unwrap(&wrapped).unwrap();
        assert_eq!(tag, FOR_APP);
        assert_eq!(rest, &[1, 2, 3]);

        let wrapped = wrap_for_protocol(&[9]);
        let (tag, rest) = unwrap(&wrapped).unwrap();
        assert_eq!(tag, FOR_PROTOCOL);
        assert_eq!(rest, &[9]);
    }

    #[test]
    fn unwrap_empty_is_none() {
        assert!(unwrap(&[]).is_none());
    }
}
