//! Rendering scan results for humans and machines.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::keys::{Certificate, Identity, Key, KeyId};
use crate::matcher::ScanItem;


//------------ ReportFormat --------------------------------------------------

/// The format to use when printing results.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ReportFormat {
    /// One line per item.
    #[default]
    Text,

    /// JSON. Streamed results are written one object per line.
    Json,
}

impl FromStr for ReportFormat {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self, ReportError> {
        match s {
            "text" => Ok(ReportFormat::Text),
            "json" => Ok(ReportFormat::Json),
            _ => Err(ReportError::UnrecognisedFormat(s.to_string())),
        }
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ReportFormat::Text => write!(f, "text"),
            ReportFormat::Json => write!(f, "json"),
        }
    }
}


//------------ ReportError ---------------------------------------------------

#[derive(Debug)]
pub enum ReportError {
    UnrecognisedFormat(String),
    Json(serde_json::Error),
}

impl fmt::Display for ReportError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ReportError::UnrecognisedFormat(s) => {
                write!(f, "This report format is not recognised: {}", s)
            }
            ReportError::Json(e) => write!(f, "Cannot produce JSON: {}", e),
        }
    }
}

impl std::error::Error for ReportError {}

impl From<serde_json::Error> for ReportError {
    fn from(e: serde_json::Error) -> Self {
        ReportError::Json(e)
    }
}


//------------ Report --------------------------------------------------------

/// Types that can be printed as the result of a command.
pub trait Report {
    fn report(&self, format: ReportFormat) -> Result<String, ReportError>;
}


//------------ KeyReport -----------------------------------------------------

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct KeyReport {
    pub id: KeyId,
    pub location: String,
    pub encrypted: bool,
}

impl From<&Key> for KeyReport {
    fn from(key: &Key) -> Self {
        KeyReport {
            id: key.identifier(),
            location: key.location().to_string(),
            encrypted: key.is_encrypted(),
        }
    }
}


//------------ CertificateReport ---------------------------------------------

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct CertificateReport {
    pub location: String,
    pub subject: String,
    pub issuer: String,
    pub serial: String,
    pub not_after: String,
    pub fingerprint: String,
}

impl From<&Certificate> for CertificateReport {
    fn from(cert: &Certificate) -> Self {
        CertificateReport {
            location: cert.location().to_string(),
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            serial: cert.serial().to_string(),
            not_after: cert.not_after().to_string(),
            fingerprint: cert.fingerprint().to_string(),
        }
    }
}


//------------ ItemReport ----------------------------------------------------

/// A single result as printed.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ItemReport {
    Key {
        key: KeyReport,
    },
    Identity {
        key: KeyReport,
        certificate: CertificateReport,
    },
    UnmatchedKey {
        key: KeyReport,
    },
    UnmatchedCertificate {
        certificate: CertificateReport,
    },
}

impl From<&ScanItem> for ItemReport {
    fn from(item: &ScanItem) -> Self {
        match item {
            ScanItem::Key(key) => ItemReport::from(key),
            ScanItem::Identity(identity) => ItemReport::from(identity),
            ScanItem::UnmatchedKey(key) => {
                ItemReport::UnmatchedKey { key: key.into() }
            }
            ScanItem::UnmatchedCertificate(cert) => {
                ItemReport::UnmatchedCertificate {
                    certificate: cert.into(),
                }
            }
        }
    }
}

impl From<&Key> for ItemReport {
    fn from(key: &Key) -> Self {
        ItemReport::Key { key: key.into() }
    }
}

impl From<&Identity> for ItemReport {
    fn from(identity: &Identity) -> Self {
        ItemReport::Identity {
            key: identity.key().into(),
            certificate: identity.certificate().into(),
        }
    }
}

impl Report for ItemReport {
    /// Renders the item on a single line.
    fn report(&self, format: ReportFormat) -> Result<String, ReportError> {
        match format {
            ReportFormat::Json => Ok(serde_json::to_string(self)?),
            ReportFormat::Text => Ok(match self {
                ItemReport::Key { key } => {
                    format!("key {} {}", key.id, key.location)
                }
                ItemReport::Identity { key, certificate } => format!(
                    "identity '{}' key {} certificate {}",
                    certificate.subject, key.location, certificate.location
                ),
                ItemReport::UnmatchedKey { key } => {
                    format!("unmatched key {} {}", key.id, key.location)
                }
                ItemReport::UnmatchedCertificate { certificate } => format!(
                    "unmatched certificate '{}' {}",
                    certificate.subject, certificate.location
                ),
            }),
        }
    }
}

impl Report for Vec<ItemReport> {
    fn report(&self, format: ReportFormat) -> Result<String, ReportError> {
        match format {
            ReportFormat::Json => Ok(serde_json::to_string_pretty(self)?),
            ReportFormat::Text => {
                let mut res = String::new();
                for item in self {
                    res.push_str(&item.report(format)?);
                    res.push('\n');
                }
                Ok(res)
            }
        }
    }
}


//------------ Tests ---------------------------------------------------------
