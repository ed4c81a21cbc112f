use std::{fmt, io, path::PathBuf};

/// Classified failure causes.
///
/// Operations return [`eyre::Result`]; the report carries one of these as its cause so callers can
/// tell configuration problems from I/O trouble with `report.downcast_ref::<Error>()`.
#[derive(Debug)]
pub enum Error {
    /// Invalid configuration: unknown handler type, missing deployment, bad chore id.
    Config(String),

    /// A deployment handler rejected its parameters.
    Param(String),

    /// Creating, writing, renaming or reading a file failed.
    Storage { path: PathBuf, source: io::Error },

    /// `meta.json` exists but does not hold valid JSON.
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// A remote command (`ssh`, `scp`) could not be spawned or exited non-zero.
    Remote { command: String, detail: String },
}

impl Error {
    pub(crate) fn storage(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Storage {
            path: path.into(),
            source,
        }
    }

    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_))
    }

    pub fn is_param(&self) -> bool {
        matches!(self, Error::Param(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(msg) => write!(f, "configuration error: {msg}"),
            Error::Param(msg) => write!(f, "parameter error: {msg}"),
            Error::Storage { path, source } => {
                write!(f, "storage error at {}: {source}", path.display())
            }
            Error::Parse { path, source } => {
                write!(f, "failed to parse {}: {source}", path.display())
            }
            Error::Remote { command, detail } => write!(f, "`{command}` failed: {detail}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Storage { source, .. } => Some(source),
            Error::Parse { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Finds the classified cause of a report, if any.
pub fn classify(report: &eyre::Report) -> Option<&Error> {
    report.chain().find_map(|err| err.downcast_ref::<Error>())
}
