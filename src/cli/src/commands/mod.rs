//! CLI command definitions and dispatch.

mod import;
mod layers;
mod manifests;
mod prune;
mod rm;
mod stat;
mod version;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use kiln_core::{KilnConfig, StorageConfig};
use kiln_storage::{LayerTarStore, ManifestStore, SystemClock};

/// Inspect and maintain a kiln storage root.
///
/// Opening a store clears its download area, so do not run this against a
/// root that a build is currently using.
#[derive(Parser)]
#[command(name = "kiln-store", version, about)]
pub struct Cli {
    /// Storage root (overrides the config file)
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Config file (.yaml, .yml or .json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// List cached layers
    Layers(layers::LayersArgs),
    /// List cached manifests
    Manifests(manifests::ManifestsArgs),
    /// Show details of a cached layer
    Stat(stat::StatArgs),
    /// Commit a file into the layer cache under its SHA-256 digest
    Import(import::ImportArgs),
    /// Remove one or more cached layers
    Rm(rm::RmArgs),
    /// Remove idle or expired layers
    Prune(prune::PruneArgs),
    /// Show version information
    Version(version::VersionArgs),
}

/// Resolve the effective configuration: file (if any), then `--root`.
pub fn load_config(cli: &Cli) -> Result<KilnConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => KilnConfig::load(path)?,
        None => KilnConfig::default(),
    };
    if let Some(root) = &cli.root {
        config.storage.root = root.clone();
    }
    Ok(config)
}

/// Open the layer store under the configured root.
pub(crate) fn open_layer_store(
    storage: &StorageConfig,
) -> Result<LayerTarStore, Box<dyn std::error::Error>> {
    let store = LayerTarStore::with_options(
        &storage.root,
        storage.layer_cache_size,
        std::sync::Arc::new(SystemClock),
    )?;
    Ok(store)
}

/// Open the manifest store under the configured root.
pub(crate) fn open_manifest_store(
    storage: &StorageConfig,
) -> Result<ManifestStore, Box<dyn std::error::Error>> {
    let store = ManifestStore::with_options(
        &storage.root,
        storage.manifest_cache_size,
        std::sync::Arc::new(SystemClock),
    )?;
    Ok(store)
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub fn dispatch(cli: Cli, config: KilnConfig) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Layers(args) => layers::execute(args, &config),
        Command::Manifests(args) => manifests::execute(args, &config),
        Command::Stat(args) => stat::execute(args, &config),
        Command::Import(args) => import::execute(args, &config),
        Command::Rm(args) => rm::execute(args, &config),
        Command::Prune(args) => prune::execute(args, &config),
        Command::Version(args) => version::execute(args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_global_root() {
        let cli = Cli::try_parse_from(["kiln-store", "layers", "--root", "/tmp/kiln"]).unwrap();
        assert_eq!(cli.root, Some(PathBuf::from("/tmp/kiln")));
        assert!(matches!(cli.command, Command::Layers(_)));
    }

    #[test]
    fn test_parse_prune_flags() {
        let cli = Cli::try_parse_from(["kiln-store", "prune", "--tti", "2d", "--ttl", "30d"]).unwrap();
        match cli.command {
            Command::Prune(args) => {
                assert_eq!(args.tti, Some(chrono::Duration::days(2)));
                assert_eq!(args.ttl, Some(chrono::Duration::days(30)));
            }
            _ => panic!("expected prune"),
        }
    }

    #[test]
    fn test_rm_requires_digest() {
        assert!(Cli::try_parse_from(["kiln-store", "rm"]).is_err());
    }

    #[test]
    fn test_load_config_root_override() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("kiln.yaml");
        std::fs::write(
            &path,
            "storage:\n  root: /from/file\n  layer_cache_size: 8\nlog_level: debug\n",
        )
        .unwrap();

        let cli = Cli::try_parse_from([
            "kiln-store",
            "--config",
            path.to_str().unwrap(),
            "layers",
        ])
        .unwrap();
        let config = load_config(&cli).unwrap();
        assert_eq!(config.storage.root, PathBuf::from("/from/file"));
        assert_eq!(config.storage.layer_cache_size, 8);

        let cli = Cli::try_parse_from([
            "kiln-store",
            "--config",
            path.to_str().unwrap(),
            "--root",
            "/override",
            "layers",
        ])
        .unwrap();
        assert_eq!(
            load_config(&cli).unwrap().storage.root,
            PathBuf::from("/override")
        );
    }

    #[test]
    fn test_import_list_remove() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("root");
        let layer = tmp.path().join("layer.tar");
        std::fs::write(&layer, b"layer").unwrap();

        let run = |args: &[&str]| {
            let mut argv = vec!["kiln-store", "--root", root.to_str().unwrap()];
            argv.extend_from_slice(args);
            let cli = Cli::try_parse_from(argv).unwrap();
            let config = load_config(&cli).unwrap();
            dispatch(cli, config)
        };

        run(&["import", layer.to_str().unwrap()]).unwrap();
        assert!(!layer.exists());
        run(&["layers"]).unwrap();

        let mut config = KilnConfig::default();
        config.storage.root = root.clone();
        let digests = open_layer_store(&config.storage)
            .unwrap()
            .list_store_files()
            .unwrap();
        assert_eq!(digests.len(), 1);

        run(&["stat", digests[0].as_str()]).unwrap();
        run(&["rm", digests[0].as_str()]).unwrap();
        assert!(run(&["rm", digests[0].as_str()]).is_err());
        run(&["rm", "--force", digests[0].as_str()]).unwrap();
        run(&["prune", "--tti", "1d"]).unwrap();
        run(&["manifests"]).unwrap();
    }
}
