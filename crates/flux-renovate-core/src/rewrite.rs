//! Pass 2: inject Renovate annotations into HelmRelease sources
//!
//! Renovate's helm-values/flux managers read a comment of the form
//!
//! ```yaml
//! spec:
//!   chart:
//!     spec:
//!       # renovate: registryUrl=https://stefanprodan.github.io/podinfo
//!       chart: podinfo
//!       version: 6.5.4
//! ```
//!
//! to learn which registry to poll. The patch is a line-level text edit so
//! the rest of the file (comments, quoting, key order) is left untouched,
//! and it is idempotent: the annotation directly above the release's chart
//! line is replaced rather than added to. Annotations belonging to other
//! releases in the same file are not touched.
//!
//! In-place writes truncate the file before writing; a crash mid-write can
//! leave it corrupted. [`WriteMode::Atomic`] avoids that at the cost of a
//! temporary file next to the target.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::config::WriteMode;
use crate::index::{RepositoryIndex, Resolution};
use crate::resource::{HelmRelease, NamespacedName, ResourceKind, classify};
use crate::source::{Document, Origin};

/// Comment prefix Renovate looks for
pub const RENOVATE_MARKER: &str = "# renovate: registryUrl=";

/// The chart name key; the surrounding spaces keep `chart:` blocks from
/// matching
pub const CHART_KEY: &str = " chart: ";

/// Options for the rewrite pass
#[derive(Debug, Clone, Default)]
pub struct RewriteOptions {
    /// Root that relative provenance paths are resolved against
    pub scan_root: PathBuf,
    /// Resolve everything but never touch the disk
    pub dry_run: bool,
    pub write_mode: WriteMode,
}

/// Why a release was left alone
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Pass 1 never resolved this release to a repository
    Unresolved,
    /// `spec.chart.spec` lacks `chart` or `version`
    MissingChartFields,
    /// The resolved repository is not in the index
    UnknownRepository(NamespacedName),
    /// A rendered document without an origin annotation
    NoProvenance,
    /// The source file does not exist on disk
    FileMissing(PathBuf),
    /// The source file has no chart line naming the release's chart
    ChartLineMissing(PathBuf),
    /// Reading or writing the source file failed
    Io { file: PathBuf, message: String },
}

/// Terminal state of a release in the rewrite pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteStatus {
    Rewritten { file: PathBuf, url: String },
    /// Already annotated with this URL
    Unchanged { file: PathBuf },
    DryRun { file: PathBuf, url: String },
    Skipped(SkipReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseOutcome {
    pub release: NamespacedName,
    pub status: RewriteStatus,
}

impl ReleaseOutcome {
    fn skipped(release: &NamespacedName, reason: SkipReason) -> Self {
        Self {
            release: release.clone(),
            status: RewriteStatus::Skipped(reason),
        }
    }
}

/// Annotate the chart line naming `chart` with `url`
///
/// The target is the first ` chart: ` line whose value is `chart`. Renovate
/// annotations directly above it are replaced by a single one for `url`,
/// with the chart line's indentation and line ending. Every other byte is
/// preserved. Returns `None` if no chart line names `chart`.
pub fn annotate(content: &str, chart: &str, url: &str) -> Option<String> {
    let lines: Vec<&str> = content.split_inclusive('\n').collect();
    let target = lines
        .iter()
        .position(|line| chart_value(line) == Some(chart))?;

    let mut start = target;
    while start > 0 && lines[start - 1].contains(RENOVATE_MARKER) {
        start -= 1;
    }

    let chart_line = lines[target];
    let indent = &chart_line[..chart_line.len() - chart_line.trim_start().len()];
    // A final line without a newline takes the file's own line ending
    let ending = line_ending(chart_line)
        .or_else(|| lines.iter().find_map(|line| line_ending(line)))
        .unwrap_or("\n");

    let mut output = String::with_capacity(content.len() + RENOVATE_MARKER.len() + url.len() + 16);
    lines[..start].iter().for_each(|line| output.push_str(line));
    output.push_str(indent);
    output.push_str(RENOVATE_MARKER);
    output.push_str(url);
    output.push_str(ending);
    lines[target..].iter().for_each(|line| output.push_str(line));

    Some(output)
}

/// The unquoted value of a ` chart: <name>` key line
fn chart_value(line: &str) -> Option<&str> {
    let (prefix, value) = line.split_once(CHART_KEY)?;
    if !prefix.trim().is_empty() {
        return None;
    }

    let value = value.split(" #").next().unwrap_or(value).trim();
    Some(value.trim_matches(|c| c == '"' || c == '\''))
}

fn line_ending(line: &str) -> Option<&'static str> {
    if line.ends_with("\r\n") {
        Some("\r\n")
    } else if line.ends_with('\n') {
        Some("\n")
    } else {
        None
    }
}

/// Annotate the source of every resolved `HelmRelease`
pub fn rewrite(
    documents: &[Document],
    index: &RepositoryIndex,
    resolution: &Resolution,
    options: &RewriteOptions,
) -> Vec<ReleaseOutcome> {
    documents
        .iter()
        .filter(|doc| classify(&doc.value) == ResourceKind::Release)
        .filter_map(|doc| rewrite_release(doc, index, resolution, options))
        .collect()
}

fn rewrite_release(
    doc: &Document,
    index: &RepositoryIndex,
    resolution: &Resolution,
    options: &RewriteOptions,
) -> Option<ReleaseOutcome> {
    let release = match HelmRelease::from_value(&doc.value) {
        Ok(release) => release,
        Err(e) => {
            debug!(origin = %doc.origin, error = %e, "Not rewriting invalid HelmRelease");
            return None;
        }
    };
    let id = release.identity();

    let Some(repository) = resolution.repository_for(&id) else {
        debug!(release = %id, origin = %doc.origin, "HelmRelease was not resolved");
        return Some(ReleaseOutcome::skipped(&id, SkipReason::Unresolved));
    };

    let Some(chart) = release
        .chart()
        .filter(|chart| chart.has_chart_and_version())
        .and_then(|chart| chart.chart.as_deref())
    else {
        debug!(release = %id, origin = %doc.origin, "HelmRelease has no chart name and version");
        return Some(ReleaseOutcome::skipped(&id, SkipReason::MissingChartFields));
    };

    let Some(url) = index.url(repository) else {
        warn!(release = %id, repository = %repository, "Resolved HelmRepository is not indexed");
        return Some(ReleaseOutcome::skipped(
            &id,
            SkipReason::UnknownRepository(repository.clone()),
        ));
    };

    let Some(file) = source_file(doc, &release, &options.scan_root) else {
        warn!(release = %id, origin = %doc.origin, "Rendered HelmRelease has no origin annotation");
        return Some(ReleaseOutcome::skipped(&id, SkipReason::NoProvenance));
    };

    if !file.is_file() {
        warn!(release = %id, file = %file.display(), "HelmRelease source file does not exist");
        return Some(ReleaseOutcome::skipped(&id, SkipReason::FileMissing(file)));
    }

    if options.dry_run {
        info!(
            release = %id,
            file = %file.display(),
            url,
            "Dry run, not writing Renovate annotation"
        );
        return Some(ReleaseOutcome {
            release: id,
            status: RewriteStatus::DryRun {
                file,
                url: url.to_string(),
            },
        });
    }

    let status = match patch_file(&file, chart, url, options.write_mode) {
        Ok(Some(true)) => {
            info!(release = %id, file = %file.display(), url, "Updated Renovate annotation");
            RewriteStatus::Rewritten {
                file,
                url: url.to_string(),
            }
        }
        Ok(Some(false)) => {
            debug!(release = %id, file = %file.display(), "Renovate annotation is up to date");
            RewriteStatus::Unchanged { file }
        }
        Ok(None) => {
            warn!(release = %id, file = %file.display(), chart, "No chart line to annotate");
            RewriteStatus::Skipped(SkipReason::ChartLineMissing(file))
        }
        Err(e) => {
            error!(release = %id, file = %file.display(), error = %e, "Failed to update file");
            RewriteStatus::Skipped(SkipReason::Io {
                file,
                message: e.to_string(),
            })
        }
    };

    Some(ReleaseOutcome {
        release: id,
        status,
    })
}

/// The editable file a release document came from
///
/// Rendered documents point back to their source through kustomize's origin
/// annotation, which is relative to the kustomization that was built; the
/// scan root is tried as a fallback.
pub(crate) fn source_file(doc: &Document, release: &HelmRelease, scan_root: &Path) -> Option<PathBuf> {
    match &doc.origin {
        Origin::File(path) => Some(path.clone()),
        Origin::Rendered { root } => {
            let relative = release.metadata.origin_path()?;
            let from_root = root.join(&relative);
            if from_root.exists() {
                Some(from_root)
            } else {
                Some(scan_root.join(relative))
            }
        }
    }
}

/// Returns `Some(changed)`, or `None` when the file has no chart line
fn patch_file(path: &Path, chart: &str, url: &str, mode: WriteMode) -> std::io::Result<Option<bool>> {
    let content = fs::read_to_string(path)?;

    let Some(updated) = annotate(&content, chart, url) else {
        return Ok(None);
    };

    if updated == content {
        return Ok(Some(false));
    }

    write_file(path, &updated, mode)?;
    Ok(Some(true))
}

fn write_file(path: &Path, content: &str, mode: WriteMode) -> std::io::Result<()> {
    match mode {
        WriteMode::InPlace => fs::write(path, content),
        WriteMode::Atomic => {
            let dir = path
                .parent()
                .filter(|parent| !parent.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));

            let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
            tmp.write_all(content.as_bytes())?;
            tmp.as_file().set_permissions(fs::metadata(path)?.permissions())?;
            tmp.as_file().sync_all()?;
            tmp.persist(path).map_err(|e| e.error)?;
            Ok(())
        }
    }
}
