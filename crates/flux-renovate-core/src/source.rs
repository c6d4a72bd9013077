//! Manifest discovery and YAML document streams
//!
//! A [`DocumentSource`] turns a cluster directory into an immutable list of
//! [`Document`]s, either by reading every manifest directly or by handing
//! each Kustomization root to a [`ManifestRenderer`]. Loading is
//! restartable: every call walks the tree again.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::Deserialize;
use serde_yaml::Value;
use tracing::{debug, error, warn};
use walkdir::WalkDir;

use crate::error::{CoreError, Result};
use crate::render::ManifestRenderer;

/// File extensions considered manifests
pub const MANIFEST_EXTENSIONS: &[&str] = &["yaml", "yml"];

/// File names that mark a Kustomization root
pub const KUSTOMIZATION_FILES: &[&str] = &["kustomization.yaml", "kustomization.yml", "Kustomization"];

/// Where a document came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// Read directly from a manifest on disk
    File(PathBuf),
    /// Emitted by the renderer for the Kustomization rooted here
    Rendered { root: PathBuf },
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Rendered { root } => write!(f, "{} (rendered)", root.display()),
        }
    }
}

/// A single parsed YAML document and its origin
#[derive(Debug, Clone)]
pub struct Document {
    pub origin: Origin,
    pub value: Value,
}

/// What to do with a file that is not valid YAML
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ParseErrorPolicy {
    /// Abort the whole load
    #[default]
    Fail,
    /// Log a warning and continue with the next file
    Skip,
}

impl ParseErrorPolicy {
    pub fn from_tolerance(tolerate: bool) -> Self {
        if tolerate { Self::Skip } else { Self::Fail }
    }
}

/// Parse a multi-document YAML stream
///
/// Empty documents (including comment-only ones) are dropped.
pub fn parse_documents(content: &str, origin: &Origin) -> Result<Vec<Document>> {
    let mut documents = Vec::new();

    for de in serde_yaml::Deserializer::from_str(content) {
        let value = Value::deserialize(de).map_err(|source| CoreError::YamlParse {
            origin: origin.to_string(),
            source,
        })?;

        if value.is_null() {
            continue;
        }

        documents.push(Document {
            origin: origin.clone(),
            value,
        });
    }

    Ok(documents)
}

/// Drop `.` components so `./cluster/apps` and `cluster/apps` compare equal
fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|component| !matches!(component, Component::CurDir))
        .collect()
}

/// Paths excluded from discovery
///
/// Plain entries are directories (absolute, relative to the working
/// directory, or relative to the scan root). Entries containing glob
/// metacharacters are matched against the path relative to the scan root.
#[derive(Debug, Default)]
struct Exclusions {
    paths: Vec<PathBuf>,
    patterns: Vec<glob::Pattern>,
}

impl Exclusions {
    fn new(root: &Path, entries: &[String]) -> Result<Self> {
        let mut exclusions = Self::default();

        for entry in entries {
            if entry.contains(['*', '?', '[']) {
                let pattern = glob::Pattern::new(entry).map_err(|source| {
                    CoreError::InvalidExclude {
                        pattern: entry.clone(),
                        source,
                    }
                })?;
                exclusions.patterns.push(pattern);
            } else {
                let path = PathBuf::from(entry);
                if path.is_relative() {
                    exclusions.paths.push(normalize(&root.join(&path)));
                }
                exclusions.paths.push(normalize(&path));
            }
        }

        Ok(exclusions)
    }

    fn is_excluded(&self, root: &Path, path: &Path) -> bool {
        let normalized = normalize(path);
        if self.paths.iter().any(|excluded| normalized.starts_with(excluded)) {
            return true;
        }

        let relative = path.strip_prefix(root).unwrap_or(path);
        self.patterns
            .iter()
            .any(|pattern| pattern.matches_path(relative))
    }
}

/// Walk `root`, keeping the files `keep` accepts, sorted
fn walk_files(root: &Path, excluded: &[String], keep: fn(&Path) -> bool) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(CoreError::ClusterPathNotFound {
            path: root.to_path_buf(),
        });
    }

    let exclusions = Exclusions::new(root, excluded)?;
    let mut files = Vec::new();

    let walker = WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| !exclusions.is_excluded(root, entry.path()));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable path");
                continue;
            }
        };

        if entry.file_type().is_file() && keep(entry.path()) {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort();
    Ok(files)
}

fn is_manifest(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| MANIFEST_EXTENSIONS.contains(&ext.as_str()))
}

fn is_kustomization(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| KUSTOMIZATION_FILES.contains(&name))
}

/// Find every manifest under `root`, sorted
pub fn find_manifests(root: &Path, excluded: &[String]) -> Result<Vec<PathBuf>> {
    walk_files(root, excluded, is_manifest)
}

/// Find every directory under `root` holding a Kustomization file, sorted
///
/// The extensionless `Kustomization` marker counts too, so this walks
/// separately from [`find_manifests`].
pub fn find_kustomization_roots(root: &Path, excluded: &[String]) -> Result<Vec<PathBuf>> {
    let mut roots: Vec<PathBuf> = walk_files(root, excluded, is_kustomization)?
        .into_iter()
        .filter_map(|path| path.parent().map(Path::to_path_buf))
        .collect();

    // A directory with more than one marker is still one root
    roots.sort();
    roots.dedup();
    Ok(roots)
}

/// Loads documents from a cluster directory
#[derive(Debug, Clone)]
pub struct DocumentSource {
    root: PathBuf,
    excluded: Vec<String>,
    policy: ParseErrorPolicy,
}

impl DocumentSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            excluded: Vec::new(),
            policy: ParseErrorPolicy::default(),
        }
    }

    pub fn excluding(mut self, excluded: Vec<String>) -> Self {
        self.excluded = excluded;
        self
    }

    pub fn with_policy(mut self, policy: ParseErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read and parse every manifest directly
    pub fn load_raw(&self) -> Result<Vec<Document>> {
        let mut documents = Vec::new();

        for path in find_manifests(&self.root, &self.excluded)? {
            let origin = Origin::File(path.clone());
            let parsed = std::fs::read_to_string(&path)
                .map_err(CoreError::from)
                .and_then(|content| parse_documents(&content, &origin));

            if let Some(mut docs) = self.tolerate(parsed, &origin)? {
                debug!(file = %path.display(), documents = docs.len(), "Loaded manifest");
                documents.append(&mut docs);
            }
        }

        Ok(documents)
    }

    /// Render every Kustomization root and parse the combined output
    ///
    /// A root whose rendering fails contributes nothing; the failure is
    /// logged and the remaining roots are still rendered.
    pub fn load_rendered(&self, renderer: &dyn ManifestRenderer) -> Result<Vec<Document>> {
        let mut documents = Vec::new();

        for root in find_kustomization_roots(&self.root, &self.excluded)? {
            let output = match renderer.render(&root) {
                Ok(output) => output,
                Err(e) => {
                    error!(root = %root.display(), error = %e, "Skipping kustomization");
                    continue;
                }
            };

            let origin = Origin::Rendered { root: root.clone() };
            let parsed = parse_documents(&output, &origin);

            if let Some(mut docs) = self.tolerate(parsed, &origin)? {
                debug!(root = %root.display(), documents = docs.len(), "Rendered kustomization");
                documents.append(&mut docs);
            }
        }

        Ok(documents)
    }

    fn tolerate(
        &self,
        parsed: Result<Vec<Document>>,
        origin: &Origin,
    ) -> Result<Option<Vec<Document>>> {
        match parsed {
            Ok(docs) => Ok(Some(docs)),
            Err(e) if self.policy == ParseErrorPolicy::Skip => {
                warn!(origin = %origin, error = %e, "Skipping invalid YAML");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
