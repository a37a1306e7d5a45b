use clap::{Parser, Subcommand};

use engagement_points::constants::DEFAULT_HISTORY_LIMIT;

#[derive(Parser, Debug)]
#[command(version, about = "Converts creator post engagement into campaign points")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Run the sweep scheduler and midnight reset until interrupted
    Run,

    /// Run a single sweep over every eligible campaign and print the report
    Sweep,

    /// Sweep one campaign now, outside the schedule
    Reprocess {
        campaign: i64,
        #[arg(long)]
        company: i64,
    },

    /// Zero today's point counters on snapshots last credited before today
    ResetDaily,

    /// Print a campaign's ranks, computed from the ledger
    Ranks { campaign: i64 },

    /// Recompute the cached creator totals of a campaign from the ledger
    RebuildScores { campaign: i64 },

    /// List a campaign's snapshots flagged for review
    Flagged { campaign: i64 },

    /// Print a creator's ledger entries, newest first
    History {
        creator: i64,
        #[arg(long)]
        campaign: Option<i64>,
        #[arg(long, default_value_t = DEFAULT_HISTORY_LIMIT)]
        limit: i64,
    },

    /// Apply pending database migrations
    Migrate,
}

pub fn parse_cli_args() -> Cli {
    Cli::parse()
}
