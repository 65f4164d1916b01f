//! Status command implementation.

use crate::net::codec;
use crate::protocol::messages::{ClientRequest, ClientResponse};
use anyhow::{bail, Context, Result};
use clap::Args;
use tokio::net::TcpStream;

const STATUS_FRAME_LIMIT: usize = 1024 * 1024;

/// Query a running node's status.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Node client address.
    #[arg(short, long, default_value = "127.0.0.1:7400")]
    pub address: String,

    /// Output format (text, json).
    #[arg(long, default_value = "text")]
    pub format: String,
}

/// Run the status command.
pub async fn run_status(args: StatusArgs) -> Result<()> {
    let mut stream = TcpStream::connect(&args.address)
        .await
        .with_context(|| format!("failed to connect to {}", args.address))?;

    codec::write_frame(&mut stream, &ClientRequest::Status, STATUS_FRAME_LIMIT)
        .await
        .context("failed to send status request")?;
    let response: Option<ClientResponse> = codec::read_frame(&mut stream, STATUS_FRAME_LIMIT)
        .await
        .context("failed to read status response")?;

    let Some(ClientResponse::Status(status)) = response else {
        bail!("unexpected response from {}", args.address);
    };

    if args.format == "json" {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("Notarius Node Status");
    println!("====================");
    println!("Notary:    {}", status.notary);
    println!("Variant:   {}", status.variant);
    println!("Provider:  {}", status.provider_mode);
    if let Some(consensus) = &status.consensus {
        println!();
        println!("Consensus:");
        println!("  Node:         {}", consensus.id);
        println!("  Role:         {}", consensus.role);
        println!("  Term:         {}", consensus.term);
        match consensus.leader_hint {
            Some(leader) => println!("  Leader:       {leader}"),
            None => println!("  Leader:       unknown"),
        }
        println!("  Commit index: {}", consensus.commit_index);
        println!("  Last index:   {}", consensus.last_index);
    }
    println!();
    println!("Requests:");
    println!("  Received:     {}", status.requests.requests);
    println!("  Notarized:    {}", status.requests.notarized);
    println!("  Rejected:     {}", status.requests.rejected_terminal);
    println!("  Retryable:    {}", status.requests.failed_retryable);
    println!();
    println!("Commits:");
    println!("  Batches:      {}", status.commits.committed_batches);
    println!("  State refs:   {}", status.commits.committed_refs);
    println!("  Idempotent:   {}", status.commits.idempotent_hits);
    println!("  Conflicts:    {}", status.commits.conflicts);
    Ok(())
}
