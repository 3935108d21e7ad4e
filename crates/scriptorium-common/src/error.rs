//! Error types shared across scriptorium crates.

use std::path::PathBuf;

use miette::Diagnostic;

/// Configuration loading/saving errors
#[derive(thiserror::Error, Debug, Diagnostic)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("unsupported config format for {}", path.display())]
    #[diagnostic(
        code(scriptorium::config::format),
        help("use a .json or .toml file extension")
    )]
    UnsupportedFormat { path: PathBuf },

    #[error("failed to access config file {}", path.display())]
    #[diagnostic(code(scriptorium::config::io))]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid value for {var}: {message}")]
    #[diagnostic(code(scriptorium::config::invalid))]
    InvalidEnv { var: &'static str, message: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Serde(#[from] SerDeError),
}

/// Serialization/deserialization errors
#[derive(thiserror::Error, Debug, Diagnostic)]
#[non_exhaustive]
pub enum SerDeError {
    #[error(transparent)]
    #[diagnostic(code(scriptorium::serde::json))]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    #[diagnostic(code(scriptorium::serde::toml_de))]
    TomlDe(#[from] toml::de::Error),

    #[error(transparent)]
    #[diagnostic(code(scriptorium::serde::toml_ser))]
    TomlSer(#[from] toml::ser::Error),
}
