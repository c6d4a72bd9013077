//! Annotate command - resolve chart registries and patch HelmRelease sources

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use clap::builder::BoolishValueParser;
use flux_renovate_core::render::DEFAULT_KUSTOMIZE_BIN;
use flux_renovate_core::{KustomizeRenderer, RenovateConfig, Renovator, WriteMode};
use tracing::debug;

use crate::error::{CliError, Result};

#[derive(Args, Debug)]
pub struct AnnotateArgs {
    /// Path to cluster root, e.g. './cluster'
    #[arg(long, env = "CLUSTER_PATH")]
    pub cluster_path: PathBuf,

    /// Folder or glob pattern to skip (repeatable, comma separated in the environment)
    #[arg(long = "excluded-folders", env = "EXCLUDED_FOLDERS", value_delimiter = ',')]
    pub excluded_folders: Vec<String>,

    /// Do not alter HelmRelease files
    #[arg(long, env = "DRY_RUN", value_parser = BoolishValueParser::new())]
    pub dry_run: bool,

    /// Skip files that are not valid YAML instead of failing
    #[arg(long, env = "TOLERATE_YAML_ERRORS", value_parser = BoolishValueParser::new())]
    pub tolerate_yaml_errors: bool,

    /// Resolve releases against `kustomize build` output of every Kustomization
    #[arg(long, env = "KUSTOMIZE", value_parser = BoolishValueParser::new())]
    pub kustomize: bool,

    /// Renderer executable used with --kustomize
    #[arg(long, env = "KUSTOMIZE_BIN", default_value = DEFAULT_KUSTOMIZE_BIN)]
    pub kustomize_bin: String,

    /// Kill the renderer after this many seconds
    #[arg(long, env = "RENDER_TIMEOUT", value_name = "SECONDS")]
    pub render_timeout: Option<u64>,

    /// Write through a temporary file and rename it over the original
    #[arg(long, env = "ATOMIC_WRITES", value_parser = BoolishValueParser::new())]
    pub atomic_writes: bool,
}

impl AnnotateArgs {
    fn config(&self) -> RenovateConfig {
        let write_mode = if self.atomic_writes {
            WriteMode::Atomic
        } else {
            WriteMode::InPlace
        };

        RenovateConfig::new(&self.cluster_path)
            .excluding(self.excluded_folders.clone())
            .dry_run(self.dry_run)
            .tolerate_yaml_errors(self.tolerate_yaml_errors)
            .write_mode(write_mode)
    }
}

pub fn run(args: &AnnotateArgs) -> Result<()> {
    if !args.cluster_path.is_dir() {
        return Err(CliError::input_with_help(
            format!("invalid --cluster-path '{}'", args.cluster_path.display()),
            "--cluster-path (or CLUSTER_PATH) must point to an existing directory",
        ));
    }

    debug!(?args, "Starting annotate");

    let mut renovator = Renovator::new(args.config());
    if args.kustomize {
        let renderer = KustomizeRenderer::new(&args.kustomize_bin)
            .with_timeout(args.render_timeout.map(Duration::from_secs));
        renovator = renovator.with_renderer(renderer);
    }

    renovator.run()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: AnnotateArgs,
    }

    #[test]
    fn test_parse_flags() {
        let cli = TestCli::parse_from([
            "flux-renovate",
            "--cluster-path",
            "./cluster",
            "--excluded-folders",
            "archived",
            "--excluded-folders",
            "**/tmp,legacy",
            "--dry-run",
            "--kustomize",
            "--render-timeout",
            "30",
        ]);

        assert_eq!(cli.args.cluster_path, PathBuf::from("./cluster"));
        assert_eq!(cli.args.excluded_folders, vec!["archived", "**/tmp", "legacy"]);
        assert!(cli.args.dry_run);
        assert!(cli.args.kustomize);
        assert_eq!(cli.args.kustomize_bin, "kustomize");
        assert_eq!(cli.args.render_timeout, Some(30));
        assert!(!cli.args.atomic_writes);
    }

    #[test]
    fn test_config_from_args() {
        let cli = TestCli::parse_from([
            "flux-renovate",
            "--cluster-path",
            "./cluster",
            "--tolerate-yaml-errors",
            "--atomic-writes",
        ]);

        let config = cli.args.config();
        assert_eq!(config.write_mode, WriteMode::Atomic);
        assert_eq!(
            config.parse_errors,
            flux_renovate_core::ParseErrorPolicy::Skip
        );
        assert!(!config.dry_run);
    }

    #[test]
    fn test_missing_cluster_path_rejected() {
        let cli = TestCli::parse_from([
            "flux-renovate",
            "--cluster-path",
            "/definitely/not/a/cluster",
        ]);
        let err = run(&cli.args).unwrap_err();
        assert!(matches!(err, CliError::Input { .. }));
    }
}
