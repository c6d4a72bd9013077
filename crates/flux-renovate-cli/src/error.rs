//! CLI error types with exit code handling
//!
//! This module provides a unified error type for CLI operations that
//! maps errors to appropriate exit codes.

use flux_renovate_core::CoreError;
use miette::Diagnostic;
use thiserror::Error;

use crate::exit_codes;

/// CLI-specific error type that includes exit code information
#[derive(Error, Debug, Diagnostic, Clone)]
pub enum CliError {
    /// A manifest is not valid YAML
    #[error("YAML error: {message}")]
    #[diagnostic(
        code(flux_renovate::cli::yaml),
        help("Fix the manifest, exclude it with --excluded-folders, or pass --tolerate-yaml-errors")
    )]
    Yaml { message: String },

    /// User provided invalid input
    #[error("Invalid input: {message}")]
    #[diagnostic(code(flux_renovate::cli::input))]
    Input {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// IO error (file not found, permissions, etc.)
    #[error("IO error: {message}")]
    #[diagnostic(code(flux_renovate::cli::io))]
    Io { message: String },

    /// Anything else
    #[error("{message}")]
    #[diagnostic(code(flux_renovate::cli::error))]
    Other { message: String },
}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Yaml { .. } => exit_codes::YAML_ERROR,
            CliError::Input { .. } => exit_codes::USAGE_ERROR,
            CliError::Io { .. } => exit_codes::IO_ERROR,
            CliError::Other { .. } => exit_codes::ERROR,
        }
    }

    /// Create an input error with help text
    pub fn input_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Input {
            message: message.into(),
            help: Some(help.into()),
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::YamlParse { .. } => CliError::Yaml {
                message: err.to_string(),
            },
            CoreError::ClusterPathNotFound { .. } => CliError::input_with_help(
                err.to_string(),
                "--cluster-path (or CLUSTER_PATH) must point to an existing directory",
            ),
            CoreError::InvalidExclude { .. } => CliError::Input {
                message: err.to_string(),
                help: None,
            },
            CoreError::Io(_) => CliError::Io {
                message: err.to_string(),
            },
            other => CliError::Other {
                message: other.to_string(),
            },
        }
    }
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;
    use flux_renovate_core::Origin;
    use std::path::PathBuf;

    #[test]
    fn test_yaml_error_exit_code() {
        let core_err = flux_renovate_core::parse_documents(
            "key: [unclosed",
            &Origin::File(PathBuf::from("apps/release.yaml")),
        )
        .unwrap_err();

        let err = CliError::from(core_err);
        assert_eq!(err.exit_code(), exit_codes::YAML_ERROR);
        assert!(err.to_string().contains("apps/release.yaml"));
    }

    #[test]
    fn test_missing_cluster_path_is_usage_error() {
        let err = CliError::from(CoreError::ClusterPathNotFound {
            path: PathBuf::from("./cluster"),
        });
        assert_eq!(err.exit_code(), exit_codes::USAGE_ERROR);
    }

    #[test]
    fn test_io_error_exit_code() {
        let err = CliError::from(CoreError::Io(std::io::Error::other("disk full")));
        assert_eq!(err.exit_code(), exit_codes::IO_ERROR);
    }
}
