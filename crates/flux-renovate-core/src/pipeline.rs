//! Runs both passes over a cluster directory

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::RenovateConfig;
use crate::error::Result;
use crate::index::{build_repository_index, resolve_releases};
use crate::render::ManifestRenderer;
use crate::resource::{HelmRelease, ResourceKind, classify};
use crate::rewrite::{ReleaseOutcome, RewriteStatus, rewrite, source_file};
use crate::source::{Document, Origin};

/// Summary of a run
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Distinct `HelmRepository` identities indexed
    pub repositories: usize,
    /// `HelmRelease` identities resolved to a repository
    pub resolved: usize,
    /// Conflicting resolutions that were discarded
    pub conflicts: usize,
    pub outcomes: Vec<ReleaseOutcome>,
}

impl RunReport {
    fn count(&self, predicate: impl Fn(&RewriteStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| predicate(&o.status)).count()
    }

    pub fn rewritten(&self) -> usize {
        self.count(|s| matches!(s, RewriteStatus::Rewritten { .. }))
    }

    pub fn unchanged(&self) -> usize {
        self.count(|s| matches!(s, RewriteStatus::Unchanged { .. }))
    }

    pub fn dry_run(&self) -> usize {
        self.count(|s| matches!(s, RewriteStatus::DryRun { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, RewriteStatus::Skipped(_)))
    }
}

/// Resolves repositories for every release and annotates their sources
pub struct Renovator {
    config: RenovateConfig,
    renderer: Option<Box<dyn ManifestRenderer>>,
}

impl Renovator {
    pub fn new(config: RenovateConfig) -> Self {
        Self {
            config,
            renderer: None,
        }
    }

    /// Resolve against rendered Kustomizations instead of raw files
    pub fn with_renderer(mut self, renderer: impl ManifestRenderer + 'static) -> Self {
        self.renderer = Some(Box::new(renderer));
        self
    }

    pub fn config(&self) -> &RenovateConfig {
        &self.config
    }

    pub fn run(&self) -> Result<RunReport> {
        let source = self.config.document_source();
        info!(
            cluster_path = %self.config.cluster_path.display(),
            rendered = self.renderer.is_some(),
            dry_run = self.config.dry_run,
            "Scanning cluster manifests"
        );

        // Pass 1 sees the merged view when a renderer is available
        let resolved_view = match &self.renderer {
            Some(renderer) => source.load_rendered(renderer.as_ref())?,
            None => source.load_raw()?,
        };

        let index = build_repository_index(&resolved_view);
        let resolution = resolve_releases(&resolved_view, &index);

        let targets = match &self.renderer {
            Some(_) => rewrite_targets(resolved_view, source.load_raw()?, source.root()),
            None => resolved_view,
        };

        let outcomes = rewrite(&targets, &index, &resolution, &self.config.rewrite_options());

        let report = RunReport {
            repositories: index.len(),
            resolved: resolution.len(),
            conflicts: resolution.conflicts().len(),
            outcomes,
        };

        info!(
            repositories = report.repositories,
            resolved = report.resolved,
            conflicts = report.conflicts,
            rewritten = report.rewritten(),
            unchanged = report.unchanged(),
            dry_run = report.dry_run(),
            skipped = report.skipped(),
            "Finished"
        );

        Ok(report)
    }
}

/// Documents for the rewrite pass in rendered mode
///
/// A rendered release that points back to an existing source file keeps the
/// identity it was resolved under (kustomize may have set its namespace or
/// a name prefix). Every raw document from a file no such release points to
/// is used as read from disk.
fn rewrite_targets(rendered: Vec<Document>, raw: Vec<Document>, scan_root: &Path) -> Vec<Document> {
    let mut covered: BTreeSet<PathBuf> = BTreeSet::new();

    let mut targets: Vec<Document> = rendered
        .into_iter()
        .filter(|doc| {
            if classify(&doc.value) != ResourceKind::Release {
                return false;
            }
            let Ok(release) = HelmRelease::from_value(&doc.value) else {
                return false;
            };
            match source_file(doc, &release, scan_root).map(fs::canonicalize) {
                Some(Ok(file)) => {
                    debug!(
                        release = %release.identity(),
                        file = %file.display(),
                        "Rendered HelmRelease has provenance"
                    );
                    covered.insert(file);
                    true
                }
                _ => false,
            }
        })
        .collect();

    targets.extend(raw.into_iter().filter(|doc| match &doc.origin {
        Origin::File(path) => fs::canonicalize(path).map_or(true, |file| !covered.contains(&file)),
        Origin::Rendered { .. } => true,
    }));

    targets
}
