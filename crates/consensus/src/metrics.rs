//! Per-node Prometheus metrics. Every node owns its registry so several
//! nodes can share a process.

use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use quorum_types::{ConsensusError, NodeState, Result};

#[derive(Clone)]
pub struct ConsensusMetrics {
    registry: Registry,
    pub seals_accepted: IntCounterVec,
    pub seals_rejected: IntCounterVec,
    pub height: IntGauge,
    pub round: IntGauge,
    pub blocks_finalized: IntCounter,
    pub new_rounds: IntCounterVec,
    pub state_changes: IntCounterVec,
}

fn register_err(e: prometheus::Error) -> ConsensusError {
    ConsensusError::Config(format!("Failed to register metric: {}", e))
}

impl ConsensusMetrics {
    pub fn new(node: &str) -> Result<Self> {
        let registry = Registry::new_custom(Some("quorum".to_string()), None).map_err(register_err)?;

        let seals_accepted = IntCounterVec::new(
            Opts::new("seals_accepted_total", "Seals admitted by the compiler").const_label("node", node),
            &["kind"],
        )
        .map_err(register_err)?;
        let seals_rejected = IntCounterVec::new(
            Opts::new("seals_rejected_total", "Seals dropped by the compiler").const_label("node", node),
            &["reason"],
        )
        .map_err(register_err)?;
        let height = IntGauge::with_opts(
            Opts::new("home_height", "Height currently under vote").const_label("node", node),
        )
        .map_err(register_err)?;
        let round = IntGauge::with_opts(
            Opts::new("home_round", "Round currently under vote").const_label("node", node),
        )
        .map_err(register_err)?;
        let blocks_finalized = IntCounter::with_opts(
            Opts::new("blocks_finalized_total", "Blocks finalized by consensus or sync")
                .const_label("node", node),
        )
        .map_err(register_err)?;
        let new_rounds = IntCounterVec::new(
            Opts::new("new_rounds_total", "Rounds started after a failed round").const_label("node", node),
            &["cause"],
        )
        .map_err(register_err)?;
        let state_changes = IntCounterVec::new(
            Opts::new("state_changes_total", "Lifecycle state changes").const_label("node", node),
            &["to"],
        )
        .map_err(register_err)?;

        registry.register(Box::new(seals_accepted.clone())).map_err(register_err)?;
        registry.register(Box::new(seals_rejected.clone())).map_err(register_err)?;
        registry.register(Box::new(height.clone())).map_err(register_err)?;
        registry.register(Box::new(round.clone())).map_err(register_err)?;
        registry.register(Box::new(blocks_finalized.clone())).map_err(register_err)?;
        registry.register(Box::new(new_rounds.clone())).map_err(register_err)?;
        registry.register(Box::new(state_changes.clone())).map_err(register_err)?;

        Ok(Self {
            registry,
            seals_accepted,
            seals_rejected,
            height,
            round,
            blocks_finalized,
            new_rounds,
            state_changes,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_state(&self, state: NodeState) {
        self.state_changes.with_label_values(&[&state.to_string()]).inc();
    }

    pub fn record_position(&self, height: u64, round: u64) {
        self.height.set(height as i64);
        self.round.set(round as i64);
    }

    pub fn render(&self) -> String {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::new();
        if encoder.encode(&self.registry.gather(), &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
