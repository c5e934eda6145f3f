//! `kiln-store rm` command: remove one or more cached layers.

use clap::Args;
use kiln_core::KilnConfig;

#[derive(Args)]
pub struct RmArgs {
    /// Layer digests to remove
    #[arg(required = true)]
    pub digests: Vec<String>,

    /// Ignore layers that are not cached
    #[arg(short, long)]
    pub force: bool,
}

pub fn execute(args: RmArgs, config: &KilnConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open_layer_store(&config.storage)?;

    let mut errors: Vec<String> = Vec::new();
    for digest in &args.digests {
        match store.delete_store_file(digest) {
            Ok(()) => println!("Removed: {digest}"),
            Err(e) if args.force && e.is_not_found() => continue,
            Err(e) => errors.push(format!("{digest}: {e}")),
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        let msg = errors.join("\n");
        Err(format!("Failed to remove layer(s):\n{msg}").into())
    }
}
