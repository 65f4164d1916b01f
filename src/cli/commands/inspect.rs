//! Inspect command implementation.

use crate::raft::log::{RaftLog, RAFT_LOG_FILE};
use crate::storage::store::{CommitStore, COMMIT_LOG_FILE};
use anyhow::Result;
use clap::{Args, Subcommand};
use std::path::{Path, PathBuf};

/// Inspect on-disk state.
#[derive(Args, Debug)]
pub struct InspectArgs {
    #[command(subcommand)]
    pub command: InspectCommand,
}

/// Inspect subcommands.
#[derive(Subcommand, Debug)]
pub enum InspectCommand {
    /// Summarize the commit store and replicated log in a data directory.
    Log {
        /// Data directory.
        #[arg(short, long, default_value = "data")]
        data_dir: PathBuf,
    },
}

/// Run the inspect command.
pub fn run_inspect(args: InspectArgs) -> Result<()> {
    match args.command {
        InspectCommand::Log { data_dir } => inspect_logs(&data_dir),
    }
}

fn inspect_logs(data_dir: &Path) -> Result<()> {
    println!("Data directory: {}", data_dir.display());

    let commit_log = data_dir.join(COMMIT_LOG_FILE);
    if commit_log.exists() {
        let store = CommitStore::open(data_dir)?;
        println!();
        println!("Commit store ({COMMIT_LOG_FILE}):");
        println!("  Committed refs: {}", store.committed_ref_count());
    } else {
        println!();
        println!("Commit store ({COMMIT_LOG_FILE}): absent");
    }

    let raft_log = data_dir.join(RAFT_LOG_FILE);
    if raft_log.exists() {
        let log = RaftLog::open(data_dir)?;
        let hs = log.hard_state();
        println!();
        println!("Replicated log ({RAFT_LOG_FILE}):");
        println!("  Entries:      {}", log.last_index());
        println!("  Last term:    {}", log.last_term());
        println!("  Commit index: {}", log.commit_index());
        println!("  Current term: {}", hs.term);
        match hs.voted_for {
            Some(node) => println!("  Voted for:    {node}"),
            None => println!("  Voted for:    -"),
        }
    } else {
        println!();
        println!("Replicated log ({RAFT_LOG_FILE}): absent");
    }

    Ok(())
}
