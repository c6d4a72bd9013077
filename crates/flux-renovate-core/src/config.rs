//! Run configuration

use std::path::PathBuf;

use crate::rewrite::RewriteOptions;
use crate::source::{DocumentSource, ParseErrorPolicy};

/// How patched files are written back
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WriteMode {
    /// Truncate and rewrite the file
    #[default]
    InPlace,
    /// Write a sibling temporary file and rename it over the original
    Atomic,
}

/// Everything a run needs besides the renderer
#[derive(Debug, Clone, Default)]
pub struct RenovateConfig {
    /// Root of the cluster manifests, e.g. `./cluster`
    pub cluster_path: PathBuf,

    /// Folders or glob patterns that are never scanned
    pub excluded_folders: Vec<String>,

    /// Resolve everything, write nothing
    pub dry_run: bool,

    pub parse_errors: ParseErrorPolicy,

    pub write_mode: WriteMode,
}

impl RenovateConfig {
    pub fn new(cluster_path: impl Into<PathBuf>) -> Self {
        Self {
            cluster_path: cluster_path.into(),
            ..Self::default()
        }
    }

    pub fn excluding(mut self, excluded_folders: Vec<String>) -> Self {
        self.excluded_folders = excluded_folders;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn tolerate_yaml_errors(mut self, tolerate: bool) -> Self {
        self.parse_errors = ParseErrorPolicy::from_tolerance(tolerate);
        self
    }

    pub fn write_mode(mut self, write_mode: WriteMode) -> Self {
        self.write_mode = write_mode;
        self
    }

    pub fn document_source(&self) -> DocumentSource {
        DocumentSource::new(&self.cluster_path)
            .excluding(self.excluded_folders.clone())
            .with_policy(self.parse_errors)
    }

    pub fn rewrite_options(&self) -> RewriteOptions {
        RewriteOptions {
            scan_root: self.cluster_path.clone(),
            dry_run: self.dry_run,
            write_mode: self.write_mode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RenovateConfig::new("./cluster");
        assert_eq!(config.cluster_path, PathBuf::from("./cluster"));
        assert!(!config.dry_run);
        assert_eq!(config.parse_errors, ParseErrorPolicy::Fail);
        assert_eq!(config.write_mode, WriteMode::InPlace);
    }

    #[test]
    fn test_builder() {
        let config = RenovateConfig::new("./cluster")
            .excluding(vec!["archived".to_string()])
            .dry_run(true)
            .tolerate_yaml_errors(true)
            .write_mode(WriteMode::Atomic);

        assert_eq!(config.parse_errors, ParseErrorPolicy::Skip);

        let options = config.rewrite_options();
        assert!(options.dry_run);
        assert_eq!(options.write_mode, WriteMode::Atomic);
        assert_eq!(options.scan_root, PathBuf::from("./cluster"));
        assert_eq!(config.document_source().root(), PathBuf::from("./cluster"));
    }
}
