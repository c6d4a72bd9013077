//! Flux Renovate Core - Resolution and rewrite engine for Renovate Helm annotations
//!
//! This crate provides everything needed to annotate Flux `HelmRelease`
//! manifests with the chart registry they install from:
//! - `DocumentSource`: Discovers manifests and parses multi-document YAML
//! - `ManifestRenderer`: External renderer interface (`kustomize build`)
//! - `RepositoryIndex`: `HelmRepository` name to chart URL
//! - `Resolution`: `HelmRelease` name to `HelmRepository` name
//! - `rewrite`: Idempotent `# renovate: registryUrl=` comment injection
//! - `Renovator`: Runs both passes end to end

pub mod config;
pub mod error;
pub mod index;
pub mod pipeline;
pub mod render;
pub mod resource;
pub mod rewrite;
pub mod source;

pub use config::{RenovateConfig, WriteMode};
pub use error::{CoreError, Result};
pub use index::{
    RepositoryIndex, Resolution, ResolutionConflict, build_repository_index, resolve_releases,
};
pub use pipeline::{Renovator, RunReport};
pub use render::{KustomizeRenderer, ManifestRenderer};
pub use resource::{
    ChartRef, DEFAULT_NAMESPACE, HelmRelease, HelmRepository, NamespacedName, ResourceKind,
    SourceRef, classify,
};
pub use rewrite::{
    CHART_KEY, RENOVATE_MARKER, ReleaseOutcome, RewriteOptions, RewriteStatus, SkipReason, annotate,
    rewrite,
};
pub use source::{
    Document, DocumentSource, Origin, ParseErrorPolicy, find_kustomization_roots, find_manifests,
    parse_documents,
};
