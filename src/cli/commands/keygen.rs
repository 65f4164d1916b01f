//! Keygen command implementation.

use crate::protocol::messages::NotarySigner;
use anyhow::Result;
use clap::Args;

/// Generate a notary signing key.
#[derive(Args, Debug)]
pub struct KeygenArgs {
    /// Notary display name to embed in the config snippet.
    #[arg(short, long, default_value = "notary-1")]
    pub name: String,
}

/// Run the keygen command.
pub fn run_keygen(args: KeygenArgs) -> Result<()> {
    let signer = NotarySigner::generate(args.name.clone());
    let party = signer.party();

    println!("# generated notary identity");
    println!("[identity]");
    println!("name = {:?}", args.name);
    println!("signing_key_hex = {:?}", signer.seed_hex());
    println!();
    println!("# public key (share with clients for attestation verification)");
    println!("# {}", party.public_key_hex);
    Ok(())
}
