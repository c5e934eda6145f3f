//! `kiln-store prune` command: remove idle or expired layers.

use chrono::Duration;
use clap::Args;
use kiln_core::KilnConfig;

use crate::output;

#[derive(Args)]
pub struct PruneArgs {
    /// Remove layers not accessed for this long, e.g. "7d" (default from config)
    #[arg(long, value_parser = output::parse_duration)]
    pub tti: Option<Duration>,

    /// Remove layers older than this, e.g. "30d"; 0 disables (default from config)
    #[arg(long, value_parser = output::parse_duration)]
    pub ttl: Option<Duration>,
}

pub fn execute(args: PruneArgs, config: &KilnConfig) -> Result<(), Box<dyn std::error::Error>> {
    let cleanup = &config.storage.cleanup;
    let tti = args
        .tti
        .unwrap_or_else(|| Duration::seconds(secs(cleanup.tti_secs)));
    let ttl = args
        .ttl
        .unwrap_or_else(|| Duration::seconds(secs(cleanup.ttl_secs)));

    let store = super::open_layer_store(&config.storage)?;
    let before = store.list_store_files()?.len();
    let usage = store.cleanup(tti, ttl)?;
    let after = store.list_store_files()?.len();

    println!(
        "Removed {} layer(s), {} remaining ({})",
        before.saturating_sub(after),
        after,
        output::format_bytes(usage)
    );
    Ok(())
}

/// Config seconds, clamped to what `Duration` can represent.
fn secs(value: u64) -> i64 {
    const MAX_SECS: i64 = i64::MAX / 1_000;
    i64::try_from(value).map_or(MAX_SECS, |v| v.min(MAX_SECS))
}
