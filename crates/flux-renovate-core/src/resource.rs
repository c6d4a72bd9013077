//! Flux resource model and classification
//!
//! Only two kinds matter here: `HelmRepository` (declares a chart registry
//! URL) and `HelmRelease` (installs a chart from a repository). Both are
//! read through typed views whose optional fields mirror how partial
//! Kustomize overlays look on disk, so a missing block is a `None` rather
//! than an error.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer};
use serde_yaml::Value;

use crate::error::{CoreError, Result};

/// Namespace assumed when `metadata.namespace` is absent
pub const DEFAULT_NAMESPACE: &str = "default";

/// Accepted `apiVersion` values for `HelmRepository`
pub const HELM_REPOSITORY_API_VERSIONS: &[&str] = &[
    "source.toolkit.fluxcd.io/v1beta1",
    "source.toolkit.fluxcd.io/v1beta2",
    "source.toolkit.fluxcd.io/v1",
];

/// Accepted `apiVersion` values for `HelmRelease`
pub const HELM_RELEASE_API_VERSIONS: &[&str] = &[
    "helm.toolkit.fluxcd.io/v2beta1",
    "helm.toolkit.fluxcd.io/v2beta2",
    "helm.toolkit.fluxcd.io/v2",
];

pub const HELM_REPOSITORY_KIND: &str = "HelmRepository";
pub const HELM_RELEASE_KIND: &str = "HelmRelease";

/// Annotation kustomize adds when `buildMetadata: [originAnnotations]` is set
pub const ORIGIN_ANNOTATION: &str = "config.kubernetes.io/origin";

/// Namespace-qualified resource identity, the join key between
/// repositories and releases
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl NamespacedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Build an identity, falling back to [`DEFAULT_NAMESPACE`]
    pub fn with_default_namespace(namespace: Option<&str>, name: impl Into<String>) -> Self {
        Self::new(namespace.unwrap_or(DEFAULT_NAMESPACE), name)
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// What a parsed document turned out to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Repository,
    Release,
    Other,
}

/// Classify a document by `apiVersion` and `kind`
///
/// Anything that is not a mapping, or whose fields are not strings, is
/// [`ResourceKind::Other`].
pub fn classify(doc: &Value) -> ResourceKind {
    let field = |key: &str| doc.get(key).and_then(Value::as_str);

    let (Some(api_version), Some(kind)) = (field("apiVersion"), field("kind")) else {
        return ResourceKind::Other;
    };

    if kind == HELM_REPOSITORY_KIND && HELM_REPOSITORY_API_VERSIONS.contains(&api_version) {
        ResourceKind::Repository
    } else if kind == HELM_RELEASE_KIND && HELM_RELEASE_API_VERSIONS.contains(&api_version) {
        ResourceKind::Release
    } else {
        ResourceKind::Other
    }
}

/// The subset of Kubernetes object metadata used here
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectMeta {
    pub name: String,

    #[serde(default)]
    pub namespace: Option<String>,

    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl ObjectMeta {
    pub fn identity(&self) -> NamespacedName {
        NamespacedName::with_default_namespace(self.namespace.as_deref(), &self.name)
    }

    /// Source file recorded by kustomize's origin annotation, relative to
    /// the kustomization that was built
    pub fn origin_path(&self) -> Option<String> {
        #[derive(Deserialize)]
        struct OriginAnnotation {
            path: String,
        }

        let raw = self.annotations.get(ORIGIN_ANNOTATION)?;
        serde_yaml::from_str::<OriginAnnotation>(raw)
            .ok()
            .map(|origin| origin.path)
    }
}

/// `source.toolkit.fluxcd.io` `HelmRepository`
#[derive(Debug, Clone, Deserialize)]
pub struct HelmRepository {
    pub metadata: ObjectMeta,
    pub spec: HelmRepositorySpec,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HelmRepositorySpec {
    pub url: String,
}

impl HelmRepository {
    pub fn from_value(doc: &Value) -> Result<Self> {
        from_document(doc, HELM_REPOSITORY_KIND)
    }

    pub fn identity(&self) -> NamespacedName {
        self.metadata.identity()
    }

    pub fn url(&self) -> &str {
        &self.spec.url
    }
}

/// `helm.toolkit.fluxcd.io` `HelmRelease`
///
/// Overlay fragments routinely omit most of `spec`, so everything below
/// `metadata` is optional.
#[derive(Debug, Clone, Deserialize)]
pub struct HelmRelease {
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: HelmReleaseSpec,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HelmReleaseSpec {
    #[serde(default)]
    pub chart: Option<ChartTemplate>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChartTemplate {
    #[serde(default)]
    pub spec: Option<ChartRef>,
}

/// `spec.chart.spec` of a `HelmRelease`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartRef {
    #[serde(default, deserialize_with = "scalar_string")]
    pub chart: Option<String>,

    #[serde(default, deserialize_with = "scalar_string")]
    pub version: Option<String>,

    #[serde(default)]
    pub source_ref: Option<SourceRef>,
}

impl ChartRef {
    /// Renovate needs both the chart name and the version to act
    pub fn has_chart_and_version(&self) -> bool {
        self.chart.is_some() && self.version.is_some()
    }
}

/// Cross-resource reference from a chart template to its source
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceRef {
    #[serde(default)]
    pub kind: Option<String>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub namespace: Option<String>,
}

impl SourceRef {
    pub fn is_helm_repository(&self) -> bool {
        self.kind.as_deref() == Some(HELM_REPOSITORY_KIND)
    }

    /// Identity of the referenced repository
    ///
    /// An omitted namespace means the release's own namespace.
    pub fn target(&self, release_namespace: &str) -> Option<NamespacedName> {
        let name = self.name.as_deref()?;
        let namespace = self.namespace.as_deref().unwrap_or(release_namespace);
        Some(NamespacedName::new(namespace, name))
    }
}

impl HelmRelease {
    pub fn from_value(doc: &Value) -> Result<Self> {
        from_document(doc, HELM_RELEASE_KIND)
    }

    pub fn identity(&self) -> NamespacedName {
        self.metadata.identity()
    }

    /// `spec.chart.spec`, if this document carries one
    pub fn chart(&self) -> Option<&ChartRef> {
        self.spec.chart.as_ref()?.spec.as_ref()
    }
}

fn from_document<T: serde::de::DeserializeOwned>(doc: &Value, kind: &str) -> Result<T> {
    serde_yaml::from_value(doc.clone()).map_err(|e| {
        let name = doc
            .get("metadata")
            .and_then(|m| m.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("<unnamed>");
        CoreError::Shape {
            resource: format!("{} '{}'", kind, name),
            message: e.to_string(),
        }
    })
}

/// Accept any YAML scalar where a string is expected
///
/// `version: 1.2` is a float to the YAML parser but a version string to
/// Flux.
fn scalar_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn test_namespaced_name_display() {
        let id = NamespacedName::new("flux-system", "podinfo");
        assert_eq!(id.to_string(), "flux-system/podinfo");
    }

    #[test]
    fn test_namespaced_name_defaults_namespace() {
        let id = NamespacedName::with_default_namespace(None, "podinfo");
        assert_eq!(id, NamespacedName::new("default", "podinfo"));
    }

    #[test]
    fn test_classify_repository() {
        let doc = yaml(
            r#"
apiVersion: source.toolkit.fluxcd.io/v1beta2
kind: HelmRepository
metadata:
  name: podinfo
spec:
  url: https://example.com/charts
"#,
        );
        assert_eq!(classify(&doc), ResourceKind::Repository);
    }

    #[test]
    fn test_classify_release() {
        let doc = yaml(
            r#"
apiVersion: helm.toolkit.fluxcd.io/v2beta1
kind: HelmRelease
metadata:
  name: podinfo
"#,
        );
        assert_eq!(classify(&doc), ResourceKind::Release);
    }

    #[test]
    fn test_classify_rejects_unknown_api_version() {
        let doc = yaml(
            r#"
apiVersion: helm.toolkit.fluxcd.io/v1alpha1
kind: HelmRelease
metadata:
  name: podinfo
"#,
        );
        assert_eq!(classify(&doc), ResourceKind::Other);
    }

    #[test]
    fn test_classify_rejects_kind_from_other_group() {
        let doc = yaml(
            r#"
apiVersion: source.toolkit.fluxcd.io/v1beta2
kind: HelmRelease
"#,
        );
        assert_eq!(classify(&doc), ResourceKind::Other);
    }

    #[test]
    fn test_classify_non_mapping_documents() {
        assert_eq!(classify(&yaml("- a\n- b\n")), ResourceKind::Other);
        assert_eq!(classify(&yaml("just a string")), ResourceKind::Other);
        assert_eq!(classify(&yaml("apiVersion: [1, 2]\nkind: HelmRelease")), ResourceKind::Other);
    }

    #[test]
    fn test_repository_requires_url() {
        let doc = yaml(
            r#"
apiVersion: source.toolkit.fluxcd.io/v1beta2
kind: HelmRepository
metadata:
  name: broken
spec:
  interval: 1h
"#,
        );
        let err = HelmRepository::from_value(&doc).unwrap_err();
        assert!(matches!(err, CoreError::Shape { .. }));
        assert!(err.to_string().contains("HelmRepository 'broken'"));
    }

    #[test]
    fn test_release_partial_overlay() {
        let doc = yaml(
            r#"
apiVersion: helm.toolkit.fluxcd.io/v2beta1
kind: HelmRelease
metadata:
  name: podinfo
  namespace: apps
spec:
  values:
    replicaCount: 2
"#,
        );
        let release = HelmRelease::from_value(&doc).unwrap();
        assert_eq!(release.identity(), NamespacedName::new("apps", "podinfo"));
        assert!(release.chart().is_none());
    }

    #[test]
    fn test_release_numeric_version() {
        let doc = yaml(
            r#"
apiVersion: helm.toolkit.fluxcd.io/v2beta1
kind: HelmRelease
metadata:
  name: podinfo
spec:
  chart:
    spec:
      chart: podinfo
      version: 6.5
"#,
        );
        let release = HelmRelease::from_value(&doc).unwrap();
        let chart = release.chart().unwrap();
        assert_eq!(chart.version.as_deref(), Some("6.5"));
        assert!(chart.has_chart_and_version());
    }

    #[test]
    fn test_source_ref_defaults_to_release_namespace() {
        let source_ref = SourceRef {
            kind: Some("HelmRepository".to_string()),
            name: Some("bitnami".to_string()),
            namespace: None,
        };
        assert!(source_ref.is_helm_repository());
        assert_eq!(
            source_ref.target("apps"),
            Some(NamespacedName::new("apps", "bitnami"))
        );

        let explicit = SourceRef {
            namespace: Some("flux-system".to_string()),
            ..source_ref
        };
        assert_eq!(
            explicit.target("apps"),
            Some(NamespacedName::new("flux-system", "bitnami"))
        );
    }

    #[test]
    fn test_origin_annotation() {
        let doc = yaml(
            r#"
apiVersion: helm.toolkit.fluxcd.io/v2beta1
kind: HelmRelease
metadata:
  name: podinfo
  annotations:
    config.kubernetes.io/origin: |
      path: base/podinfo/release.yaml
"#,
        );
        let release = HelmRelease::from_value(&doc).unwrap();
        assert_eq!(
            release.metadata.origin_path().as_deref(),
            Some("base/podinfo/release.yaml")
        );
    }
}
