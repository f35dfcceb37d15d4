//! Defines all pemscout errors.

use std::{error, fmt, io};

use crate::cli::report::ReportError;
use crate::config::ConfigError;


//------------ Error ---------------------------------------------------------

#[derive(Debug)]
pub enum Error {
    /// Reading from or walking the filesystem failed.
    Io(IoError),

    /// OpenSSL could not decode or process key material.
    OpenSsl(openssl::error::ErrorStack),

    /// A file contained malformed PEM armor.
    Pem(pem::PemError),

    /// The configuration could not be loaded or applied.
    Config(ConfigError),

    /// Results could not be rendered as JSON.
    Json(serde_json::Error),

    Custom(String),
}

impl Error {
    pub fn custom(msg: impl fmt::Display) -> Self {
        Error::Custom(msg.to_string())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(e) => e.fmt(f),
            Error::OpenSsl(e) => write!(f, "OpenSSL error: {e}"),
            Error::Pem(e) => write!(f, "Invalid PEM: {e}"),
            Error::Config(e) => e.fmt(f),
            Error::Json(e) => write!(f, "Cannot produce JSON: {e}"),
            Error::Custom(s) => s.fmt(f),
        }
    }
}

impl error::Error for Error {}

impl From<IoError> for Error {
    fn from(e: IoError) -> Self {
        Error::Io(e)
    }
}

impl From<openssl::error::ErrorStack> for Error {
    fn from(e: openssl::error::ErrorStack) -> Self {
        Error::OpenSsl(e)
    }
}

impl From<pem::PemError> for Error {
    fn from(e: pem::PemError) -> Self {
        Error::Pem(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}

impl From<ReportError> for Error {
    fn from(e: ReportError) -> Self {
        match e {
            ReportError::Json(e) => Error::Json(e),
            other => Error::custom(other),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}


//------------ IoError -------------------------------------------------------

/// An I/O error together with a description of what we were doing.
#[derive(Debug)]
pub struct IoError {
    context: String,
    cause: io::Error,
}

impl IoError {
    pub fn new(context: impl Into<String>, cause: io::Error) -> Self {
        IoError {
            context: context.into(),
            cause,
        }
    }

    pub fn kind(&self) -> io::ErrorKind {
        self.cause.kind()
    }
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.context, self.cause)
    }
}

impl error::Error for IoError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        Some(&self.cause)
    }
}


//------------ Tests ---------------------------------------------------------
