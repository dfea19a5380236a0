//! Error taxonomy for the ChaOS build pipeline.
//!
//! Every failure is fatal to the current invocation. Variants that wrap an
//! underlying process carry its exit status so the binary can exit with it.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, Error>;

/// How a child process terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Normal exit with a status code.
    Code(i32),
    /// Killed by a signal (unix only).
    Signal(i32),
}

impl ExitStatus {
    /// Status code the pipeline should exit with.
    pub fn exit_code(self) -> i32 {
        match self {
            ExitStatus::Code(code) => code,
            ExitStatus::Signal(sig) => 128 + sig,
        }
    }

    pub fn success(self) -> bool {
        self == ExitStatus::Code(0)
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Code(code) => write!(f, "exit status {}", code),
            ExitStatus::Signal(sig) => write!(f, "signal {}", sig),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// A nested toolchain (or container build) returned nonzero.
    #[error("`{command}` failed with {status}")]
    BuildFailure { command: String, status: ExitStatus },

    /// An expected build output is absent or empty.
    #[error("{name} missing or empty at {}", .path.display())]
    MissingArtifact { name: String, path: PathBuf },

    /// A host tool or input file is absent at the point of use.
    #[error("{what} not found at {}", .path.display())]
    MissingDependency { what: String, path: PathBuf },

    #[error("cannot decompress {}: {source}", .archive.display())]
    DecompressionFailure {
        archive: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("emulator exited with {status}")]
    EmulatorExit { status: ExitStatus },

    #[error("smoke test failed: {0}")]
    SmokeTest(String),

    #[error("unknown target '{0}'")]
    UnknownTarget(String),

    #[error("stage '{0}' is declared twice")]
    DuplicateStage(String),

    #[error("dependency cycle: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    #[error("invalid config {}: {source}", .path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: Box<toml::de::Error>,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl Error {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }

    /// Exit status of the underlying process, if this error is one.
    pub fn process_status(&self) -> Option<ExitStatus> {
        match self {
            Error::BuildFailure { status, .. } | Error::EmulatorExit { status } => Some(*status),
            _ => None,
        }
    }

    /// Exit code for the binary: the failing process's status, else 1.
    pub fn exit_code(&self) -> i32 {
        self.process_status().map_or(1, ExitStatus::exit_code)
    }
}

/// Attach a lazily built context message to an `io::Result`.
pub trait IoContext<T> {
    fn with_io_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> IoContext<T> for std::result::Result<T, io::Error> {
    fn with_io_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| Error::io(f(), e))
    }
}
