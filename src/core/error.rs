use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Parse,
    NotOpen,
    AlreadyOpen,
    LockContention,
    NotFound,
    ReadOnlyViolation,
    OutOfSpace,
    CorruptReference,
    UnsupportedVersion,
    InvalidArgument,
    Internal,
}

impl ErrorKind {
    /// Structural integrity failures. These are never retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ErrorKind::CorruptReference | ErrorKind::UnsupportedVersion)
    }
}

#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub context: String,
}

impl Error {
    pub fn new(kind: ErrorKind, context: String) -> Self {
        Error { kind, context }
    }

    pub fn not_open() -> Self {
        Error::new(ErrorKind::NotOpen, "database handle is not open".to_string())
    }

    pub fn read_only(operation: &str) -> Self {
        Error::new(
            ErrorKind::ReadOnlyViolation,
            format!("{} requires a writer handle", operation),
        )
    }

    pub fn corrupt(context: String) -> Self {
        Error::new(ErrorKind::CorruptReference, context)
    }

    pub fn invalid(context: String) -> Self {
        Error::new(ErrorKind::InvalidArgument, context)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.context)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error {
            kind: ErrorKind::Io,
            context: err.to_string(),
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error {
            kind: ErrorKind::Parse,
            context: err.to_string(),
        }
    }
}

impl From<fst::Error> for Error {
    fn from(err: fst::Error) -> Self {
        Error {
            kind: ErrorKind::Internal,
            context: format!("FST error: {}", err),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
