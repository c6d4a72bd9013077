//! Pass 1: repository index and release resolution
//!
//! Both functions are pure over an immutable document list and return fresh
//! maps, so each pass can be exercised on its own.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use tracing::{debug, info, warn};

use crate::resource::{HelmRelease, HelmRepository, NamespacedName, ResourceKind, classify};
use crate::source::Document;

/// `HelmRepository` identity to chart registry URL
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepositoryIndex {
    urls: BTreeMap<NamespacedName, String>,
}

impl RepositoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite; returns the previous URL
    pub fn insert(&mut self, id: NamespacedName, url: impl Into<String>) -> Option<String> {
        self.urls.insert(id, url.into())
    }

    pub fn url(&self, id: &NamespacedName) -> Option<&str> {
        self.urls.get(id).map(String::as_str)
    }

    pub fn contains(&self, id: &NamespacedName) -> bool {
        self.urls.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NamespacedName, &str)> {
        self.urls.iter().map(|(id, url)| (id, url.as_str()))
    }
}

/// Collect every `HelmRepository` URL
///
/// Later documents overwrite earlier ones with the same identity, which lets
/// overlay layers refine a base repository.
pub fn build_repository_index(documents: &[Document]) -> RepositoryIndex {
    let mut index = RepositoryIndex::new();

    for doc in documents {
        if classify(&doc.value) != ResourceKind::Repository {
            continue;
        }

        let repository = match HelmRepository::from_value(&doc.value) {
            Ok(repository) => repository,
            Err(e) => {
                warn!(origin = %doc.origin, error = %e, "Skipping HelmRepository");
                continue;
            }
        };

        let id = repository.identity();
        info!(
            repository = %id,
            url = repository.url(),
            origin = %doc.origin,
            "Discovered HelmRepository"
        );

        if let Some(previous) = index.insert(id.clone(), repository.url()) {
            if previous != repository.url() {
                debug!(repository = %id, previous = %previous, "Overriding HelmRepository URL");
            }
        }
    }

    index
}

/// A release observed with a different repository than the one it was
/// first resolved to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionConflict {
    pub release: NamespacedName,
    pub kept: NamespacedName,
    pub discarded: NamespacedName,
}

/// `HelmRelease` identity to `HelmRepository` identity
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    repositories: BTreeMap<NamespacedName, NamespacedName>,
    conflicts: Vec<ResolutionConflict>,
}

impl Resolution {
    pub fn repository_for(&self, release: &NamespacedName) -> Option<&NamespacedName> {
        self.repositories.get(release)
    }

    pub fn conflicts(&self) -> &[ResolutionConflict] {
        &self.conflicts
    }

    pub fn len(&self) -> usize {
        self.repositories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.repositories.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NamespacedName, &NamespacedName)> {
        self.repositories.iter()
    }

    /// Record a resolution; the first one for a release wins
    fn record(&mut self, release: NamespacedName, repository: NamespacedName) {
        match self.repositories.entry(release) {
            Entry::Vacant(entry) => {
                entry.insert(repository);
            }
            Entry::Occupied(entry) if *entry.get() != repository => {
                warn!(
                    release = %entry.key(),
                    kept = %entry.get(),
                    discarded = %repository,
                    "HelmRelease resolves to conflicting HelmRepositories"
                );
                self.conflicts.push(ResolutionConflict {
                    release: entry.key().clone(),
                    kept: entry.get().clone(),
                    discarded: repository,
                });
            }
            Entry::Occupied(_) => {}
        }
    }
}

/// Map every resolvable `HelmRelease` to the repository it installs from
///
/// Releases without a chart block or a `sourceRef` are expected (overlay
/// fragments) and only logged at debug level.
pub fn resolve_releases(documents: &[Document], index: &RepositoryIndex) -> Resolution {
    let mut resolution = Resolution::default();

    for doc in documents {
        if classify(&doc.value) != ResourceKind::Release {
            continue;
        }

        let release = match HelmRelease::from_value(&doc.value) {
            Ok(release) => release,
            Err(e) => {
                warn!(origin = %doc.origin, error = %e, "Skipping HelmRelease");
                continue;
            }
        };

        let id = release.identity();

        let Some(chart) = release.chart() else {
            debug!(release = %id, origin = %doc.origin, "HelmRelease has no chart spec");
            continue;
        };

        let Some(source_ref) = &chart.source_ref else {
            debug!(release = %id, origin = %doc.origin, "HelmRelease has no sourceRef");
            continue;
        };

        if !source_ref.is_helm_repository() {
            debug!(
                release = %id,
                kind = source_ref.kind.as_deref().unwrap_or("<none>"),
                "HelmRelease source is not a HelmRepository"
            );
            continue;
        }

        let Some(repository) = source_ref.target(&id.namespace) else {
            debug!(release = %id, "HelmRelease sourceRef has no name");
            continue;
        };

        if !index.contains(&repository) {
            warn!(
                release = %id,
                repository = %repository,
                "HelmRelease references an unknown HelmRepository"
            );
            continue;
        }

        info!(release = %id, repository = %repository, "Discovered HelmRelease");
        resolution.record(id, repository);
    }

    resolution
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{Origin, parse_documents};
    use std::path::PathBuf;

    fn docs(content: &str) -> Vec<Document> {
        parse_documents(content, &Origin::File(PathBuf::from("test.yaml"))).unwrap()
    }

    fn repository(name: &str, namespace: Option<&str>, url: &str) -> String {
        let namespace = namespace
            .map(|ns| format!("\n  namespace: {}", ns))
            .unwrap_or_default();
        format!(
            "---\napiVersion: source.toolkit.fluxcd.io/v1beta2\nkind: HelmRepository\nmetadata:\n  name: {}{}\nspec:\n  url: {}\n",
            name, namespace, url
        )
    }

    fn release(name: &str, source: &str) -> String {
        format!(
            r#"---
apiVersion: helm.toolkit.fluxcd.io/v2beta1
kind: HelmRelease
metadata:
  name: {name}
spec:
  chart:
    spec:
      chart: {name}
      version: "1.2.3"
      sourceRef:
        kind: HelmRepository
        name: {source}
"#
        )
    }

    fn id(name: &str) -> NamespacedName {
        NamespacedName::new("default", name)
    }

    #[test]
    fn test_index_collects_repositories() {
        let content = repository("podinfo", None, "https://example.com/charts")
            + &repository("bitnami", Some("flux-system"), "https://charts.bitnami.com/bitnami");
        let index = build_repository_index(&docs(&content));

        assert_eq!(index.len(), 2);
        assert_eq!(index.url(&id("podinfo")), Some("https://example.com/charts"));
        assert_eq!(
            index.url(&NamespacedName::new("flux-system", "bitnami")),
            Some("https://charts.bitnami.com/bitnami")
        );
    }

    #[test]
    fn test_index_last_write_wins() {
        let content = repository("podinfo", None, "https://old.example.com")
            + &repository("podinfo", None, "https://mid.example.com")
            + &repository("podinfo", None, "https://new.example.com");
        let index = build_repository_index(&docs(&content));

        assert_eq!(index.len(), 1);
        assert_eq!(index.url(&id("podinfo")), Some("https://new.example.com"));
    }

    #[test]
    fn test_index_skips_repository_without_url() {
        let content = r#"---
apiVersion: source.toolkit.fluxcd.io/v1beta2
kind: HelmRepository
metadata:
  name: broken
spec:
  interval: 1h
"#
        .to_string()
            + &repository("podinfo", None, "https://example.com/charts");
        let index = build_repository_index(&docs(&content));

        assert_eq!(index.len(), 1);
        assert!(!index.contains(&id("broken")));
    }

    #[test]
    fn test_index_ignores_other_kinds() {
        let content = r#"
apiVersion: source.toolkit.fluxcd.io/v1beta2
kind: GitRepository
metadata:
  name: flux-system
spec:
  url: ssh://git@github.com/example/fleet
"#;
        assert!(build_repository_index(&docs(content)).is_empty());
    }

    #[test]
    fn test_resolve_release() {
        let content = repository("podinfo", None, "https://example.com/charts")
            + &release("podinfo", "podinfo");
        let documents = docs(&content);
        let index = build_repository_index(&documents);
        let resolution = resolve_releases(&documents, &index);

        assert_eq!(resolution.len(), 1);
        assert_eq!(resolution.repository_for(&id("podinfo")), Some(&id("podinfo")));
        assert!(resolution.conflicts().is_empty());
    }

    #[test]
    fn test_resolve_skips_release_without_source_ref() {
        let content = repository("podinfo", None, "https://example.com/charts")
            + r#"---
apiVersion: helm.toolkit.fluxcd.io/v2beta1
kind: HelmRelease
metadata:
  name: podinfo
spec:
  chart:
    spec:
      chart: podinfo
      version: "1.2.3"
"#;
        let documents = docs(&content);
        let index = build_repository_index(&documents);
        let resolution = resolve_releases(&documents, &index);

        assert!(resolution.is_empty());
    }

    #[test]
    fn test_resolve_skips_release_without_chart() {
        let content = repository("podinfo", None, "https://example.com/charts")
            + r#"---
apiVersion: helm.toolkit.fluxcd.io/v2beta1
kind: HelmRelease
metadata:
  name: podinfo
spec:
  values:
    replicaCount: 3
"#;
        let documents = docs(&content);
        let index = build_repository_index(&documents);
        assert!(resolve_releases(&documents, &index).is_empty());
    }

    #[test]
    fn test_resolve_skips_non_helm_repository_source() {
        let content = r#"
apiVersion: helm.toolkit.fluxcd.io/v2beta1
kind: HelmRelease
metadata:
  name: app
spec:
  chart:
    spec:
      chart: ./charts/app
      sourceRef:
        kind: GitRepository
        name: app
"#;
        let documents = docs(content);
        let mut index = RepositoryIndex::new();
        index.insert(id("app"), "https://example.com/charts");

        assert!(resolve_releases(&documents, &index).is_empty());
    }

    #[test]
    fn test_resolve_skips_dangling_reference() {
        let content = repository("podinfo", None, "https://example.com/charts")
            + &release("podinfo", "missing");
        let documents = docs(&content);
        let index = build_repository_index(&documents);

        assert!(resolve_releases(&documents, &index).is_empty());
    }

    #[test]
    fn test_resolve_is_namespace_qualified() {
        let content = repository("podinfo", Some("flux-system"), "https://example.com/charts")
            + &release("podinfo", "podinfo");
        let documents = docs(&content);
        let index = build_repository_index(&documents);

        // sourceRef without namespace points at default/podinfo
        assert!(resolve_releases(&documents, &index).is_empty());
    }

    #[test]
    fn test_resolve_conflict_keeps_first() {
        let content = repository("podinfo", None, "https://a.example.com")
            + &repository("mirror", None, "https://b.example.com")
            + &release("podinfo", "podinfo")
            + &release("podinfo", "mirror")
            + &release("podinfo", "podinfo")
            + &release("podinfo", "mirror");
        let documents = docs(&content);
        let index = build_repository_index(&documents);
        let resolution = resolve_releases(&documents, &index);

        assert_eq!(resolution.repository_for(&id("podinfo")), Some(&id("podinfo")));
        assert_eq!(resolution.conflicts().len(), 2);
        assert_eq!(
            resolution.conflicts()[0],
            ResolutionConflict {
                release: id("podinfo"),
                kept: id("podinfo"),
                discarded: id("mirror"),
            }
        );
    }

    #[test]
    fn test_resolve_overlay_fragment_does_not_block_full_release() {
        let content = repository("podinfo", None, "https://example.com/charts")
            + r#"---
apiVersion: helm.toolkit.fluxcd.io/v2beta1
kind: HelmRelease
metadata:
  name: podinfo
spec:
  chart:
    spec:
      version: "1.2.4"
"#
            + &release("podinfo", "podinfo");
        let documents = docs(&content);
        let index = build_repository_index(&documents);
        let resolution = resolve_releases(&documents, &index);

        assert_eq!(resolution.repository_for(&id("podinfo")), Some(&id("podinfo")));
    }
}
