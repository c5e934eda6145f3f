//! `kiln-store manifests` command.

use clap::Args;
use kiln_core::KilnConfig;

use crate::output;

#[derive(Args)]
pub struct ManifestsArgs {
    /// Only show references (one per line)
    #[arg(short, long)]
    pub quiet: bool,
}

pub fn execute(
    args: ManifestsArgs,
    config: &KilnConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open_manifest_store(&config.storage)?;
    let manifests = store.list_store_files()?;

    if args.quiet {
        for (repo, tag) in &manifests {
            println!("{repo}:{tag}");
        }
        return Ok(());
    }

    let mut table = output::new_table(&["REPOSITORY", "TAG", "SIZE"]);
    for (repo, tag) in &manifests {
        let size = store
            .get_store_file_stat(repo, tag)
            .map(|stat| output::format_bytes(stat.len()))
            .unwrap_or_else(|_| "-".to_string());
        table.add_row(vec![repo.clone(), tag.clone(), size]);
    }

    println!("{table}");
    Ok(())
}
