//! `kiln-store stat` command: show details of a cached layer.

use chrono::{DateTime, Utc};
use clap::Args;
use kiln_core::KilnConfig;

use crate::output;

#[derive(Args)]
pub struct StatArgs {
    /// Layer digest (hex SHA-256)
    pub digest: String,
}

pub fn execute(args: StatArgs, config: &KilnConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open_layer_store(&config.storage)?;
    let stat = store.get_download_or_cache_file_stat(&args.digest)?;

    println!("Digest:      {}", args.digest);
    println!("Size:        {}", output::format_bytes(stat.len()));
    if let Ok(mtime) = stat.modified() {
        let mtime = DateTime::<Utc>::from(mtime);
        println!(
            "Modified:    {} ({})",
            mtime.to_rfc3339(),
            output::format_ago(&mtime)
        );
    }
    match store.get_store_file_last_access(&args.digest) {
        Ok(t) => println!("Last access: {} ({})", t.to_rfc3339(), output::format_ago(&t)),
        Err(_) => println!("Last access: -"),
    }
    Ok(())
}
