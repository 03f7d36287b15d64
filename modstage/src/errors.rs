use std::io;
use std::path::{Path, PathBuf};

use itertools::join;
use thiserror::Error;

use crate::artifact::ApexInfo;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Setup of the install failed, the caller decides whether the run goes on
    #[error("{0}")]
    Setup(SetupError),

    /// Teardown could not put the device back, this is not recoverable
    #[error("{0}")]
    Runtime(RuntimeFailure),

    #[error("device {0} is not available")]
    DeviceNotAvailable(String),

    #[error("required binary `{0}` not available")]
    MissingBin(String),

    #[error("{0}")]
    IO(io::Error),

    #[error("command failed with status {0}: {1}")]
    CommandError(i32, String),

    #[error("invalid config {0}: {1}")]
    InvalidConfig(String, String),

    #[error("file {0} doesn't exist")]
    MissingFile(String),

    #[error("generic error: {0}")]
    Generic(String),
}

/// Failures raised while staging and activating modules.
///
/// Every variant that comes from a remote command carries the command's
/// stderr and stdout as they were returned.
#[derive(Error, Debug)]
pub enum SetupError {
    #[error("Failed to push local '{local}' to remote '{remote}'")]
    PushFailed { local: PathBuf, remote: String },

    #[error("Failed to create parent session. Error: {stderr}, Stdout: {stdout}")]
    CreateParentSession { stderr: String, stdout: String },

    #[error("Failed to create child session for {package}. Error: {stderr}, Stdout: {stdout}")]
    CreateChildSession {
        package: String,
        stderr: String,
        stdout: String,
    },

    #[error("Failed to parse a session id out of '{output}'")]
    InvalidSessionId { output: String },

    #[error("Failed to write {file} to session {session}. Error: {stderr}, Stdout: {stdout}")]
    WriteSession {
        file: String,
        session: u64,
        stderr: String,
        stdout: String,
    },

    #[error(
        "Failed to add child session {child} to parent session {parent}. Error: {stderr}, Stdout: {stdout}"
    )]
    AddChildSession {
        child: u64,
        parent: u64,
        stderr: String,
        stdout: String,
    },

    #[error("Failed to commit {session} on {serial}. Error: {stderr}, Output: {stdout}")]
    Commit {
        session: u64,
        serial: String,
        stderr: String,
        stdout: String,
    },

    #[error("Failed to retrieve activated apex on device {serial}. Empty set returned.")]
    EmptyActivation { serial: String },

    #[error("Failed to activate [{}] on device {serial}.", join(.failed, ", "))]
    ActivationFailed {
        serial: String,
        failed: Vec<ApexInfo>,
    },

    #[error("Mainline module {package} is not preloaded on the device but is in the input lists.")]
    NotPreloaded { package: String },

    #[error("Mainline module {package} is listed for install more than once.")]
    DuplicateModule { package: String },

    #[error("Extraction for {0:?} failed. No apk/apex is extracted.")]
    ExtractionFailed(PathBuf),

    #[error("Failed to find module file {0:?}")]
    ArtifactNotFound(PathBuf),

    #[error("invalid module file {path:?}: {reason}")]
    InvalidArtifact { path: PathBuf, reason: String },
}

#[derive(Error, Debug)]
pub enum RuntimeFailure {
    #[error("Failed to rollback {package}, Output: {output}")]
    RollbackFailed { package: String, output: String },
}

impl Error {
    pub fn new_generic<S: ToString + ?Sized>(s: &S) -> Self {
        Self::Generic(s.to_string())
    }

    pub fn new_cfg<S: ToString + ?Sized>(path: &Path, s: &S) -> Self {
        Self::InvalidConfig(path.to_string_lossy().into(), s.to_string())
    }

    #[inline]
    pub fn is_device_not_available(&self) -> bool {
        matches!(self, Self::DeviceNotAvailable(_))
    }

    /// Returns the wrapped [SetupError], if any
    pub fn as_setup(&self) -> Option<&SetupError> {
        match self {
            Self::Setup(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SetupError> for Error {
    fn from(value: SetupError) -> Self {
        Self::Setup(value)
    }
}

impl From<RuntimeFailure> for Error {
    fn from(value: RuntimeFailure) -> Self {
        Self::Runtime(value)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::IO(err)
    }
}

impl From<zip::result::ZipError> for Error {
    fn from(value: zip::result::ZipError) -> Self {
        Self::Generic(value.to_string())
    }
}
