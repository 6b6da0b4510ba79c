use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "quorum-node")]
#[command(version, about = "Permissioned BFT validator node", long_about = None)]
#[command(author = "Quorum Validator Team")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the validator (default mode)
    Run,

    /// Generate a fresh validator key
    Keygen,

    /// Show node address, validator set and thresholds
    Info,

    /// Show which validator proposes at a height and round
    Proposer {
        #[arg(long, help = "Block height")]
        height: u64,

        #[arg(long, default_value = "0", help = "Round within the height")]
        round: u64,
    },

    /// Run an in-process cluster and print the finalized chains
    Simulate {
        #[arg(short, long, default_value = "4", help = "Number of validators")]
        validators: usize,

        #[arg(long, default_value = "5", help = "Blocks every validator must finalize")]
        heights: u64,

        #[arg(short, long, default_value = "67", help = "Threshold percent")]
        threshold: u32,

        #[arg(long, default_value = "60", help = "Give up after this many seconds")]
        timeout: u64,
    },
}
