use std::fmt;
use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedReason {
    FieldCount(usize),
    GroupPrefix,
    GroupNotInteger,
    ObjectIdNotInteger,
    UnknownObjectType,
    ObjectIdBelowOne,
}

impl fmt::Display for MalformedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MalformedReason::FieldCount(count) => {
                write!(f, "expected 4 colon-separated fields, found {count}")
            }
            MalformedReason::GroupPrefix => write!(f, "first field must be the literal 'G'"),
            MalformedReason::GroupNotInteger => write!(f, "group id is not an integer"),
            MalformedReason::ObjectIdNotInteger => write!(f, "object id is not an integer"),
            MalformedReason::UnknownObjectType => write!(
                f,
                "object type must be one of Image, Dataset, Project, Experimenter, ExperimenterGroup"
            ),
            MalformedReason::ObjectIdBelowOne => write!(f, "object id must be 1 or larger"),
        }
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum HrmOmeroError {
    #[error("malformed OMERO id '{input}': {reason}")]
    #[diagnostic(help("expecting an id of the form `G:[gid]:[type]:[oid]` or `ROOT`"))]
    MalformedIdentifier {
        input: String,
        reason: MalformedReason,
    },

    #[error("{operation} requires a '{expected}' id, got '{found}'")]
    UnsupportedObjectType {
        operation: &'static str,
        expected: &'static str,
        found: String,
    },

    #[error("format not supported by OMERO: {0}")]
    UnsupportedFormat(String),

    #[error("failed to (re-)establish connection to OMERO: {0}")]
    Connection(String),

    #[error("unable to switch session to group {group}: {message}")]
    GroupSwitch { group: i64, message: String },

    #[error("OMERO request failed: {0}")]
    Remote(String),

    #[error("OMERO returned status {status}: {message}")]
    RemoteStatus { status: u16, message: String },

    #[error("permission error, need write access to OMERO_USERDIR ({userdir})")]
    #[diagnostic(help(
        "set OMERO_USERDIR in the HRM configuration to a directory writable by the calling user"
    ))]
    ImportPermission { userdir: String },

    #[error("import failed: {0}")]
    Import(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("can't parse {path}, invalid syntax in line {line}: {message}")]
    ConfigSyntax {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("missing \"{0}\" in the HRM config file")]
    MissingConfigEntry(String),

    #[error("no password given to connect to OMERO")]
    #[diagnostic(help("export OMERO_PASSWORD before calling the connector"))]
    MissingPassword,

    #[error("invalid parameter summary: {0}")]
    Summary(String),
}

impl HrmOmeroError {
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            HrmOmeroError::MalformedIdentifier { .. }
                | HrmOmeroError::UnsupportedObjectType { .. }
                | HrmOmeroError::UnsupportedFormat(_)
        )
    }

    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            HrmOmeroError::Connection(_) | HrmOmeroError::GroupSwitch { .. }
        )
    }
}
