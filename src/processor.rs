//! Relay packet processing
//!
//! The learn-then-route step between the UDP listener and the wire:
//! every packet that carries a sender index teaches the registry where
//! that session lives now, then the receiver index (when present) picks
//! the single destination. Handshake initiations have no receiver yet,
//! so they go to every other known peer; the WireGuard layer on
//! uninvolved peers discards them.

use crate::endpoint::Endpoint;
use crate::packet::{self, ParseError};
use crate::registry::Registry;
use std::sync::Arc;

/// Computes forwarding destinations for incoming packets and keeps the
/// registry current from observed traffic.
pub struct Processor {
    registry: Arc<Registry>,
}

impl Processor {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Process one datagram arriving from `source`.
    ///
    /// Learns the sender's endpoint when the header carries a sender
    /// index (the latest packet always defines the current endpoint for
    /// that index), then returns the destinations the packet should be
    /// copied to:
    ///
    /// - receiver known: exactly that endpoint
    /// - receiver unknown: nothing, the packet is dropped
    /// - no receiver (initiation): every registered endpoint except the
    ///   source itself
    pub fn process(
        &self,
        data: &[u8],
        source: &Endpoint,
    ) -> Result<Vec<Endpoint>, ParseError> {
        let msg = packet::parse(data)?;

        if let Some(sender) = msg.sender {
            self.registry.register(sender, source.clone());
        }

        if let Some(receiver) = msg.receiver {
            return Ok(match self.registry.lookup(receiver) {
                Some(dest) => vec![dest],
                None => Vec::new(),
            });
        }

        // Sender-only packet: a handshake initiation. Broadcast so a peer
        // we have never routed for can still be reached by whoever knows
        // its WireGuard identity.
        Ok(self.registry.all_except(source))
    }
}
