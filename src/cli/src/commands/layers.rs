//! `kiln-store layers` command.

use clap::Args;
use kiln_core::KilnConfig;

use crate::output;

#[derive(Args)]
pub struct LayersArgs {
    /// Only show digests (one per line)
    #[arg(short, long)]
    pub quiet: bool,
}

pub fn execute(args: LayersArgs, config: &KilnConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open_layer_store(&config.storage)?;
    let digests = store.list_store_files()?;

    if args.quiet {
        for digest in &digests {
            println!("{digest}");
        }
        return Ok(());
    }

    let mut table = output::new_table(&["DIGEST", "SIZE", "LAST ACCESS"]);
    let mut total: u64 = 0;
    for digest in &digests {
        // Evicted or removed since listing.
        let Ok(stat) = store.get_store_file_stat(digest) else {
            continue;
        };
        let last_access = store
            .get_store_file_last_access(digest)
            .map(|t| output::format_ago(&t))
            .unwrap_or_else(|_| "-".to_string());
        total += stat.len();
        table.add_row(vec![
            digest.clone(),
            output::format_bytes(stat.len()),
            last_access,
        ]);
    }

    println!("{table}");
    println!(
        "\n{} layer(s), {}",
        digests.len(),
        output::format_bytes(total)
    );
    Ok(())
}
