use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ConsensusError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeState {
    Booting,
    Joining,
    Consensus,
    Syncing,
    Stopped,
}

impl NodeState {
    pub const ALL: [NodeState; 5] = [
        NodeState::Booting,
        NodeState::Joining,
        NodeState::Consensus,
        NodeState::Syncing,
        NodeState::Stopped,
    ];

    pub fn can_transit_to(&self, to: NodeState) -> bool {
        match (self, to) {
            (NodeState::Stopped, _) => false,
            (_, NodeState::Stopped) => true,
            (NodeState::Booting, NodeState::Joining | NodeState::Syncing) => true,
            (NodeState::Joining, NodeState::Consensus | NodeState::Syncing) => true,
            (NodeState::Consensus, NodeState::Syncing) => true,
            (NodeState::Syncing, NodeState::Joining | NodeState::Consensus) => true,
            _ => false,
        }
    }
}

impl FromStr for NodeState {
    type Err = ConsensusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BOOTING" => Ok(NodeState::Booting),
            "JOINING" => Ok(NodeState::Joining),
            "CONSENSUS" => Ok(NodeState::Consensus),
            "SYNCING" => Ok(NodeState::Syncing),
            "STOPPED" => Ok(NodeState::Stopped),
            other => Err(ConsensusError::Codec(format!("unknown node state {}", other))),
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeState::Booting => write!(f, "BOOTING"),
            NodeState::Joining => write!(f, "JOINING"),
            NodeState::Consensus => write!(f, "CONSENSUS"),
            NodeState::Syncing => write!(f, "SYNCING"),
            NodeState::Stopped => write!(f, "STOPPED"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_transitions() {
        assert!(NodeState::Booting.can_transit_to(NodeState::Syncing));
        assert!(NodeState::Booting.can_transit_to(NodeState::Joining));
        assert!(NodeState::Joining.can_transit_to(NodeState::Consensus));
        assert!(NodeState::Consensus.can_transit_to(NodeState::Syncing));
        assert!(NodeState::Syncing.can_transit_to(NodeState::Consensus));
        for state in NodeState::ALL {
            assert_eq!(state.can_transit_to(NodeState::Stopped), state != NodeState::Stopped);
        }
    }

    #[test]
    fn test_rejected_transitions() {
        assert!(!NodeState::Booting.can_transit_to(NodeState::Consensus));
        assert!(!NodeState::Consensus.can_transit_to(NodeState::Booting));
        assert!(!NodeState::Stopped.can_transit_to(NodeState::Booting));
    }

    #[test]
    fn test_parse_node_state() {
        for state in NodeState::ALL {
            assert_eq!(state.to_string().parse::<NodeState>().unwrap(), state);
        }
        assert!("PAUSED".parse::<NodeState>().is_err());
    }
}
