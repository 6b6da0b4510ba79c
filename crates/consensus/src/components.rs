use quorum_network::{Broadcaster, NetworkClient};
use quorum_storage::BlockStorage;
use std::sync::Arc;

use crate::ballotbox::Ballotbox;
use crate::context::NodeContext;
use crate::home_state::HomeState;
use crate::proposal_pool::ProposalPool;
use crate::state::TransitionSender;
use crate::suffrage::Suffrage;

#[derive(Clone)]
pub struct Components {
    pub ctx: NodeContext,
    pub home: Arc<HomeState>,
    pub suffrage: Suffrage,
    pub ballotbox: Arc<Ballotbox>,
    pub pool: Arc<ProposalPool>,
    pub storage: Arc<dyn BlockStorage>,
    pub broadcaster: Arc<dyn Broadcaster>,
    pub network: Arc<dyn NetworkClient>,
    pub transition: TransitionSender,
}
