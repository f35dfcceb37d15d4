//! Discovery of PEM blocks on disk.
//!
//! This module turns files into typed [`PemBlock`]s. It owns all decoding:
//! the matchers further up only ever see blocks that have already been
//! classified and ask the block for its public key or certificate when
//! they need one.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use log::{debug, trace};
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::{X509, X509NameRef};
use tokio_util::sync::CancellationToken;

use crate::commons::error::Error;
use crate::commons::file::{self, CrawlOptions};
use crate::constants::{
    CERTIFICATE_LABELS, ENCRYPTED_PRIVATE_KEY_LABEL, PRIVATE_KEY_LABELS,
    PROC_TYPE_HEADER, PUBLIC_KEY_LABELS,
};
use crate::keys::{Certificate, Fingerprint, PublicKey};
use crate::scanner::ScanOptions;


//------------ BlockKind -----------------------------------------------------

/// What a PEM block contains.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum BlockKind {
    PrivateKey,
    PrivateKeyEncrypted,
    PublicKey,
    Certificate,

    /// Anything else, with its PEM label.
    Other(String),
}

impl BlockKind {
    /// Determines the kind of a block from its label and headers.
    pub fn classify(label: &str, headers: &BTreeMap<String, String>) -> Self {
        if PRIVATE_KEY_LABELS.contains(&label) {
            let encrypted = header_value(headers, PROC_TYPE_HEADER)
                .map(|value| value.contains("ENCRYPTED"))
                .unwrap_or(false);
            if encrypted {
                BlockKind::PrivateKeyEncrypted
            } else {
                BlockKind::PrivateKey
            }
        } else if label == ENCRYPTED_PRIVATE_KEY_LABEL {
            BlockKind::PrivateKeyEncrypted
        } else if PUBLIC_KEY_LABELS.contains(&label) {
            BlockKind::PublicKey
        } else if CERTIFICATE_LABELS.contains(&label) {
            BlockKind::Certificate
        } else {
            BlockKind::Other(label.to_string())
        }
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BlockKind::PrivateKey => write!(f, "private key"),
            BlockKind::PrivateKeyEncrypted => {
                write!(f, "encrypted private key")
            }
            BlockKind::PublicKey => write!(f, "public key"),
            BlockKind::Certificate => write!(f, "certificate"),
            BlockKind::Other(label) => write!(f, "'{label}'"),
        }
    }
}


//------------ PemBlock ------------------------------------------------------

/// A single PEM block and where it was found.
#[derive(Clone, Debug)]
pub struct PemBlock {
    kind: BlockKind,
    label: String,
    der: Arc<[u8]>,
    location: String,
    headers: BTreeMap<String, String>,
}

impl PemBlock {
    pub fn new(
        kind: BlockKind,
        label: impl Into<String>,
        der: impl Into<Arc<[u8]>>,
        location: impl Into<String>,
        headers: BTreeMap<String, String>,
    ) -> Self {
        PemBlock {
            kind,
            label: label.into(),
            der: der.into(),
            location: location.into(),
            headers,
        }
    }

    /// Creates a block from parsed PEM, deriving its kind.
    pub fn from_pem(pem: &pem::Pem, location: String) -> Self {
        let headers = pem
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<BTreeMap<_, _>>();
        let kind = BlockKind::classify(pem.tag(), &headers);
        PemBlock {
            kind,
            label: pem.tag().to_string(),
            der: pem.contents().into(),
            location,
            headers,
        }
    }

    pub fn kind(&self) -> &BlockKind {
        &self.kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Returns a cheap handle on the DER content.
    pub fn der_shared(&self) -> Arc<[u8]> {
        self.der.clone()
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Returns the value of a header, matching its name case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.headers, name)
    }

    /// Returns the identifier of the key this block declares to belong to.
    pub fn declared_id(&self, header: &str) -> Option<&str> {
        self.header(header)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    /// Returns the provisional identifier of this block.
    ///
    /// This is the hash over the block's content, used for encrypted keys
    /// that have no public half yet.
    pub fn provisional_id(&self) -> Fingerprint {
        Fingerprint::of(&self.der)
    }

    /// Decodes an unencrypted private key and derives its public half.
    pub fn decode_private_key(
        &self,
    ) -> Result<(PKey<Private>, PublicKey), Error> {
        let private = PKey::private_key_from_der(&self.der)?;
        let public = PublicKey::from_der(private.public_key_to_der()?);
        Ok((private, public))
    }

    /// Decodes a public key block.
    ///
    /// The key is re-encoded as a SubjectPublicKeyInfo so that its
    /// fingerprint matches the one derived from the private key.
    pub fn decode_public_key(&self) -> Result<PublicKey, Error> {
        let der = if self.label == "RSA PUBLIC KEY" {
            let rsa = Rsa::public_key_from_der_pkcs1(&self.der)?;
            PKey::from_rsa(rsa)?.public_key_to_der()?
        } else {
            PKey::public_key_from_der(&self.der)?.public_key_to_der()?
        };
        Ok(PublicKey::from_der(der))
    }

    /// Decodes a certificate block.
    pub fn decode_certificate(&self) -> Result<Certificate, Error> {
        let x509 = X509::from_der(&self.der)?;
        let public_key =
            PublicKey::from_der(x509.public_key()?.public_key_to_der()?);
        let serial = x509.serial_number().to_bn()?.to_hex_str()?.to_string();
        Ok(Certificate::new(
            self.location.clone(),
            self.der.clone(),
            format_name(x509.subject_name()),
            format_name(x509.issuer_name()),
            serial,
            x509.not_after().to_string(),
            public_key,
        ))
    }
}

fn header_value<'a>(
    headers: &'a BTreeMap<String, String>,
    name: &str,
) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Formats a name as a comma separated list of `FIELD=value` pairs.
fn format_name(name: &X509NameRef) -> String {
    name.entries()
        .map(|entry| {
            let field = match entry.object().nid().short_name() {
                Ok(short) => short.to_string(),
                Err(_) => entry.object().to_string(),
            };
            let value = match entry.data().as_utf8() {
                Ok(value) => value.to_string(),
                Err(_) => hex::encode(entry.data().as_slice()),
            };
            format!("{field}={value}")
        })
        .collect::<Vec<_>>()
        .join(", ")
}


//------------ BlockSource ---------------------------------------------------

/// Something that can discover PEM blocks below a root.
pub trait BlockSource: Send + Sync + 'static {
    /// Hands every block found below `root` to `sink`.
    ///
    /// The walk stops early when `sink` returns `false` or once `cancel`
    /// is cancelled, which is checked before every file. An error is
    /// only returned when the root itself cannot be used; problems with
    /// individual files are logged and skipped.
    fn walk(
        &self,
        root: &Path,
        cancel: &CancellationToken,
        sink: &mut dyn FnMut(PemBlock) -> bool,
    ) -> Result<(), Error>;
}


//------------ FileSource ----------------------------------------------------

/// The block source reading PEM files from the local filesystem.
#[derive(Clone, Debug)]
pub struct FileSource {
    options: CrawlOptions,
}

impl FileSource {
    pub fn new(options: &ScanOptions) -> Self {
        FileSource {
            options: options.crawl_options(),
        }
    }

    /// Reads all PEM blocks from a single file.
    ///
    /// Returns an empty vec for files that do not contain PEM.
    pub fn read_file(path: &Path) -> Result<Vec<PemBlock>, Error> {
        let bytes = file::read(path)?;
        if !contains_armor(&bytes) {
            trace!("No PEM armor in {}", path.display());
            return Ok(Vec::new());
        }

        let path_str = path.to_string_lossy();
        Ok(pem::parse_many(&bytes)?
            .iter()
            .enumerate()
            .map(|(index, pem)| {
                let location = if index == 0 {
                    path_str.to_string()
                } else {
                    format!("{path_str}:{index}")
                };
                PemBlock::from_pem(pem, location)
            })
            .collect())
    }
}

impl BlockSource for FileSource {
    fn walk(
        &self,
        root: &Path,
        cancel: &CancellationToken,
        sink: &mut dyn FnMut(PemBlock) -> bool,
    ) -> Result<(), Error> {
        file::crawl(root, self.options, &mut |path| {
            if cancel.is_cancelled() {
                debug!("Walk of {} cancelled", root.display());
                return false;
            }
            let blocks = match Self::read_file(path) {
                Ok(blocks) => blocks,
                Err(e) => {
                    debug!("Skipping {}: {}", path.display(), e);
                    return true;
                }
            };
            for block in blocks {
                trace!("Found {} at {}", block.kind(), block.location());
                if !sink(block) {
                    return false;
                }
            }
            true
        })?;
        Ok(())
    }
}

fn contains_armor(bytes: &[u8]) -> bool {
    const ARMOR: &[u8] = b"-----BEGIN ";
    bytes.windows(ARMOR.len()).any(|window| window == ARMOR)
}


//------------ Tests ---------------------------------------------------------
