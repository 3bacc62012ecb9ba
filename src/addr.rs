//! Node addressing.

use serde::{Deserialize, Serialize};

/// A node address on the network. 16 bits, matching the wire width of every
/// address field in the datalink/transport/Deluge headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeAddr(pub u16);

impl NodeAddr {
    /// Deliver to every node directly in radio range; never forwarded.
    pub const BROADCAST: NodeAddr = NodeAddr(0xFFFF);
    /// Deliver to every node in the network; forwarded until TTL is exhausted.
    pub const FLOOD: NodeAddr = NodeAddr(0xFFFE);

    pub fn is_broadcast(self) -> bool {
        self == Self::BROADCAST
    }

    pub fn is_flood(self) -> bool {
        self == Self::FLOOD
    }

    /// True for either reserved sentinel.
    pub fn is_reserved(self) -> bool {
        self.is_broadcast() || self.is_flood()
    }
}

impl From<u16> for NodeAddr {
    fn from(value: u16) -> Self {
        NodeAddr(value)
    }
}

impl core::fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match *self {
            Self::BROADCAST => write!(f, "BROADCAST"),
            Self::FLOOD => write!(f, "FLOOD"),
            NodeAddr(v) => write!(f, "{v}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_sentinels() {
        assert!(NodeAddr::BROADCAST.is_broadcast());
        assert!(NodeAddr::FLOOD.is_flood());
        assert!(!NodeAddr(42).is_reserved());
    }
}
