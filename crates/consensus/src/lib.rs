//! Consensus core of a quorum validator.
//!
//! Verified messages enter through the [`SealCompiler`], which filters them
//! and feeds ballots to the [`Ballotbox`]. Decided vote results go to the
//! [`StateTransition`], whose active lifecycle handler drives the node
//! through INIT, SIGN and ACCEPT for each height.

pub mod ballotbox;
pub mod checker;
pub mod compiler;
pub mod components;
pub mod context;
pub mod daemon;
pub mod driver;
pub mod home_state;
pub mod metrics;
pub mod node;
pub mod proposal_pool;
pub mod proposer;
pub mod service;
pub mod state;
pub mod suffrage;
pub mod threshold;
pub mod timer;
pub mod vote_record;

#[cfg(test)]
mod test_support;

pub use ballotbox::Ballotbox;
pub use checker::{check_vote_result, ResultPosition};
pub use compiler::SealCompiler;
pub use components::Components;
pub use context::NodeContext;
pub use daemon::{Daemon, EventHandler};
pub use driver::{DriverOutcome, RoundDriver};
pub use home_state::{HomeState, HomeView};
pub use metrics::ConsensusMetrics;
pub use node::{ConsensusNode, NodeBuilder};
pub use proposal_pool::ProposalPool;
pub use proposer::{DefaultProposerSelector, FixedProposerSelector, ProposerSelector};
pub use service::NodeService;
pub use state::{StartContext, StateHandler, StateTransition, TransitionSender};
pub use suffrage::Suffrage;
pub use threshold::{Threshold, ThresholdPair};
pub use timer::{TimerId, TimerManager};
pub use vote_record::{Majority, VoteRecord, VoteRecords};
