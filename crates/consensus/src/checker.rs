use quorum_types::{VoteResult, VoteResultKind};

use crate::home_state::HomeView;

/// Where a published vote result sits relative to the node's own height.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultPosition {
    /// Result for the height under vote.
    Current,
    /// Late result for the block just finalized.
    Previous,
    Ignored,
    /// The node is behind or diverged; only syncing can recover.
    OutOfWindow,
}

impl ResultPosition {
    pub fn needs_sync(&self) -> bool {
        matches!(self, ResultPosition::OutOfWindow)
    }
}

pub fn check_vote_result(home: &HomeView, result: &VoteResult) -> ResultPosition {
    match result.kind {
        VoteResultKind::NotYetMajority | VoteResultKind::Finished => return ResultPosition::Ignored,
        VoteResultKind::GotMajority | VoteResultKind::Draw => {}
    }

    if result.height == home.height {
        return ResultPosition::Current;
    }

    let is_previous = result
        .height
        .next()
        .map(|next| next == home.height)
        .unwrap_or(false);
    if is_previous {
        let consistent = result.is_draw()
            || result.next_block == home.current_block
            || result.next_block == home.previous_block;
        if consistent {
            return ResultPosition::Previous;
        }
    }

    ResultPosition::OutOfWindow
}

#[cfg(test)]
mod tests {
    use super::*;
    use quorum_types::{Hash, Height, NodeState, Round, Stage};

    fn home() -> HomeView {
        HomeView {
            height: Height(10),
            round: Round(0),
            current_block: Hash([9u8; 32]),
            previous_block: Hash([8u8; 32]),
            state: NodeState::Consensus,
            previous_state: None,
        }
    }

    fn result(height: u64, stage: Stage, next_block: Hash, kind: VoteResultKind) -> VoteResult {
        VoteResult {
            bucket: Hash([1u8; 32]),
            height: Height(height),
            round: Round(0),
            stage,
            proposal: None,
            current_block: Hash::ZERO,
            next_block,
            kind,
        }
    }

    #[test]
    fn test_positions() {
        let home = home();
        let got = VoteResultKind::GotMajority;

        assert_eq!(
            check_vote_result(&home, &result(10, Stage::Init, Hash([9u8; 32]), got)),
            ResultPosition::Current
        );
        assert_eq!(
            check_vote_result(&home, &result(9, Stage::Accept, Hash([9u8; 32]), got)),
            ResultPosition::Previous
        );
        assert_eq!(
            check_vote_result(&home, &result(9, Stage::Init, Hash([8u8; 32]), got)),
            ResultPosition::Previous
        );
        assert_eq!(
            check_vote_result(&home, &result(9, Stage::Accept, Hash([7u8; 32]), got)),
            ResultPosition::OutOfWindow
        );
        assert_eq!(
            check_vote_result(&home, &result(11, Stage::Init, Hash::ZERO, got)),
            ResultPosition::OutOfWindow
        );
        assert_eq!(
            check_vote_result(&home, &result(8, Stage::Init, Hash::ZERO, got)),
            ResultPosition::OutOfWindow
        );
    }

    #[test]
    fn test_undecided_results_are_ignored() {
        let home = home();
        let pending = result(42, Stage::Sign, Hash::ZERO, VoteResultKind::NotYetMajority);
        let finished = result(42, Stage::Sign, Hash::ZERO, VoteResultKind::Finished);
        assert_eq!(check_vote_result(&home, &pending), ResultPosition::Ignored);
        assert_eq!(check_vote_result(&home, &finished), ResultPosition::Ignored);
    }
}
