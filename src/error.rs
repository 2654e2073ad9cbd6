//! Error taxonomy for the conversion core.
//!
//! Every subsystem returns [`ConvertError`] upward; a handful of
//! single-feature conversions (setting a console, matching a driver) are
//! allowed to recover locally and surface as a [`Warning`](crate::warn::Warning)
//! instead, but anything that would change `Source`, `Inspect`,
//! `GuestCaps`, or the target filesystem propagates.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConvertError>;

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("failed to parse source at {path}: {message}")]
    SourceParseError { path: PathBuf, message: String },

    #[error("unsupported source: {0}")]
    UnsupportedSource(String),

    #[error("missing required dependency `{tool}`: {suggestion}")]
    DependencyMissing { tool: String, suggestion: String },

    #[error("authentication failed: {0} (hint: the URI may need an embedded username)")]
    AuthFailed(String),

    #[error("manifest mismatch for {file}: expected {expected}, got {actual}")]
    ManifestMismatch {
        file: String,
        expected: String,
        actual: String,
    },

    #[error("inspection failed: {0}")]
    InspectionFailed(String),

    #[error("no matching driver for {0} and the requested capability forbids a downgrade")]
    NoMatchingDriver(String),

    #[error("transient command `{command}` failed after retry: {message}")]
    TransientCommand { command: String, message: String },

    #[error("external command `{command}` failed (exit {code:?}): {stderr_tail}")]
    ExternalCommandFailed {
        command: String,
        code: Option<i32>,
        stderr_tail: String,
    },

    #[error("conversion cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Xml(#[from] quick_xml::Error),
}

impl ConvertError {
    /// The process exit code this error kind maps to (spec.md §6).
    pub fn exit_code(&self) -> i32 {
        match self {
            ConvertError::InvalidArgument(_) => 1,
            ConvertError::SourceParseError { .. }
            | ConvertError::UnsupportedSource(_)
            | ConvertError::InspectionFailed(_) => 2,
            ConvertError::DependencyMissing { .. }
            | ConvertError::AuthFailed(_)
            | ConvertError::ManifestMismatch { .. }
            | ConvertError::NoMatchingDriver(_)
            | ConvertError::TransientCommand { .. }
            | ConvertError::ExternalCommandFailed { .. } => 3,
            ConvertError::Cancelled => 130,
            ConvertError::Io(_) | ConvertError::Xml(_) => 3,
        }
    }
}

/// A non-fatal condition attached to the conversion report (spec.md §7).
///
/// Examples: an OVA manifest entry that is present in the `.mf` but absent
/// from the archive, an unsupported `<graphics>` type falling back to
/// `display = None`, an antivirus product detected in the guest, a
/// `NoMatchingDriver` downgrade that the caller did not forbid.
#[derive(Debug, Clone)]
pub struct Warning {
    pub message: String,
}

impl Warning {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Accumulates warnings produced during a pipeline run, in emission order.
#[derive(Debug, Clone, Default)]
pub struct Warnings(Vec<Warning>);

impl Warnings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: impl Into<String>) {
        self.0.push(Warning::new(message));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Warning> {
        self.0.iter()
    }

    pub fn into_vec(self) -> Vec<Warning> {
        self.0
    }
}
