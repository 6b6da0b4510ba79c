//! Shared data model of the quorum validator.
//!
//! Heights, rounds and stages, the signed message envelope with its ballot
//! and proposal payloads, blocks, vote results and the error taxonomy used
//! by every other crate in the workspace.

mod ballot;
mod block;
mod error;
mod hash;
mod height;
mod node;
mod policy;
mod proposal;
mod seal;
mod stage;
mod vote_result;

pub use ballot::{Ballot, BallotBody};
pub use block::{Block, BlockProof, NodeInfo};
pub use error::{ConsensusError, Result};
pub use hash::{Address, Hash};
pub use height::{Height, Round};
pub use node::NodeState;
pub use policy::ConsensusPolicy;
pub use proposal::{Proposal, ProposalBody};
pub use seal::{MessageKind, Seal, SealBody, SignedMessage};
pub use stage::Stage;
pub use vote_result::{VoteResult, VoteResultKind};
