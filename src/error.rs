//! # Error Handling
//!
//! This module defines the centralized error type for the `cfn-deploy`
//! library. It uses the `thiserror` library to describe every failure mode
//! that can halt a pipeline job or a single stack action.
//!
//! ## Key Components
//!
//! - **`Error`**: The enum of all failures raised by the library. Variants
//!   carry the context needed to act on them (the config key, the stack, the
//!   remote error code).
//!
//! - **`Result<T>`**: A type alias for `std::result::Result<T, Error>`.
//!
//! Conditions the pipeline deliberately tolerates (an unrecognized path, a
//! missing mapping file, a stack that already exists) never become an
//! `Error`; they are logged and absorbed where they occur. What remains here
//! is what would otherwise deploy wrong or missing infrastructure.

use thiserror::Error;

/// Main error type for cfn-deploy operations
#[derive(Error, Debug)]
pub enum Error {
    /// The pipeline configuration file is missing, malformed, or lacks a
    /// required setting.
    #[error("Configuration error: {message}{}", hint.as_ref().map(|h| format!("\n  hint: {}", h)).unwrap_or_default())]
    Config {
        message: String,
        /// Optional hint for how to fix the configuration issue
        hint: Option<String>,
    },

    /// A parameter declared by a template has no supplied value and no
    /// `Default`.
    #[error("Required parameter [{parameter}] for template {template} has no value and no default")]
    MissingParameter { parameter: String, template: String },

    /// A template document could not be parsed.
    #[error("Template parsing error for {path}: {message}")]
    TemplateParse { path: String, message: String },

    /// A `git` invocation failed.
    #[error("Git command failed: {command} - {stderr}")]
    GitCommand { command: String, stderr: String },

    /// The orchestration or object-storage service rejected a request.
    #[error("{operation} failed: ({code}) {message}")]
    Service {
        operation: String,
        code: String,
        message: String,
    },

    /// An external static-analysis tool could not be started.
    #[error("Tool execution error: {tool} - {message}")]
    Tool { tool: String, message: String },

    /// An I/O error, wrapped from `std::io::Error`.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON error, wrapped from `serde_json::Error`.
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// A YAML parsing error, wrapped from `serde_yaml::Error`.
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// An INI parsing error, wrapped from `ini::Error`.
    #[error("INI parsing error: {0}")]
    Ini(#[from] ini::Error),

    /// The worker pool for parallel stack actions could not be built.
    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl Error {
    /// Shorthand for a configuration error without a hint.
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            hint: None,
        }
    }

    /// Returns `true` for errors that stem from pipeline configuration
    /// rather than from remote state.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Config { .. } | Error::MissingParameter { .. })
    }
}

/// A convenient type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_config() {
        let error = Error::config("Configuration is missing section: settings");
        let display = format!("{}", error);
        assert!(display.contains("Configuration error"));
        assert!(display.contains("missing section: settings"));
        assert!(!display.contains("hint:"));
    }

    #[test]
    fn test_error_display_config_with_hint() {
        let error = Error::Config {
            message: "Configuration file does not exist".to_string(),
            hint: Some("Create the file and commit it".to_string()),
        };
        let display = format!("{}", error);
        assert!(display.contains("hint:"));
        assert!(display.contains("Create the file"));
    }

    #[test]
    fn test_error_display_missing_parameter() {
        let error = Error::MissingParameter {
            parameter: "VpcId".to_string(),
            template: "network.yaml".to_string(),
        };
        let display = format!("{}", error);
        assert!(display.contains("[VpcId]"));
        assert!(display.contains("network.yaml"));
        assert!(error.is_configuration());
    }

    #[test]
    fn test_error_display_service() {
        let error = Error::Service {
            operation: "CreateStack".to_string(),
            code: "InsufficientCapabilitiesException".to_string(),
            message: "Requires capabilities".to_string(),
        };
        let display = format!("{}", error);
        assert!(display.starts_with("CreateStack failed"));
        assert!(display.contains("(InsufficientCapabilitiesException)"));
        assert!(!error.is_configuration());
    }

    #[test]
    fn test_error_display_git_command() {
        let error = Error::GitCommand {
            command: "push origin :refs/tags/cf-deployment-main".to_string(),
            stderr: "remote ref does not exist".to_string(),
        };
        let display = format!("{}", error);
        assert!(display.contains("Git command failed"));
        assert!(display.contains("remote ref does not exist"));
    }

    #[test]
    fn test_error_from_io_error() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let error: Error = io_error.into();
        let display = format!("{}", error);
        assert!(display.contains("I/O error"));
        assert!(display.contains("File not found"));
    }

    #[test]
    fn test_error_from_yaml_error() {
        let yaml_error = serde_yaml::from_str::<serde_yaml::Value>("invalid: [unclosed").unwrap_err();
        let error: Error = yaml_error.into();
        assert!(format!("{}", error).contains("YAML parsing error"));
    }

    #[test]
    fn test_error_from_json_error() {
        let json_error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let error: Error = json_error.into();
        assert!(format!("{}", error).contains("JSON parsing error"));
    }
}
