//! `kiln-store import` command: commit a file as a layer.

use std::path::PathBuf;

use clap::Args;
use kiln_core::KilnConfig;

#[derive(Args)]
pub struct ImportArgs {
    /// File to move into the layer cache
    pub path: PathBuf,
}

pub fn execute(args: ImportArgs, config: &KilnConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open_layer_store(&config.storage)?;
    let digest = store.commit_layer(&args.path)?;
    println!("{digest}");
    Ok(())
}
