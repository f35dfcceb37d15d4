//! Keys, certificates and the identities formed by pairing them.

use std::fmt;
use std::sync::Arc;

use openssl::pkey::{PKey, Private};
use serde::{Serialize, Serializer};


//------------ Fingerprint ---------------------------------------------------

/// The SHA-256 hash of a DER encoded object.
///
/// For public keys this is taken over the SubjectPublicKeyInfo and it is
/// the primary correlation key between keys and certificates.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of(der: &[u8]) -> Self {
        Fingerprint(openssl::sha::sha256(der))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        self.to_string().serialize(s)
    }
}


//------------ KeyId ---------------------------------------------------------

/// The identifier of a private key.
///
/// Normally this is the fingerprint of the public key. An encrypted key
/// whose public half is not known gets a provisional identifier derived
/// from its ciphertext instead.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum KeyId {
    Fingerprint(Fingerprint),
    Provisional(Fingerprint),
}

impl KeyId {
    pub fn is_provisional(&self) -> bool {
        matches!(self, KeyId::Provisional(_))
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        match self {
            KeyId::Fingerprint(fp) | KeyId::Provisional(fp) => fp,
        }
    }

    /// Returns whether a declared identifier refers to this key.
    ///
    /// Declared identifiers are hex strings. Case and surrounding white
    /// space are ignored.
    pub fn matches_declared(&self, declared: &str) -> bool {
        declared.trim().eq_ignore_ascii_case(&self.fingerprint().to_string())
    }
}

/// Displays the hex fingerprint; a provisional one is prefixed with a `~`.
impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            KeyId::Fingerprint(fp) => fp.fmt(f),
            KeyId::Provisional(fp) => write!(f, "~{fp}"),
        }
    }
}

impl Serialize for KeyId {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        self.to_string().serialize(s)
    }
}


//------------ PublicKey -----------------------------------------------------

/// A DER encoded SubjectPublicKeyInfo and its fingerprint.
#[derive(Clone, Eq, PartialEq)]
pub struct PublicKey {
    der: Arc<[u8]>,
    fingerprint: Fingerprint,
}

impl PublicKey {
    pub fn from_der(der: impl Into<Arc<[u8]>>) -> Self {
        let der = der.into();
        let fingerprint = Fingerprint::of(&der);
        PublicKey { der, fingerprint }
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("PublicKey").field(&self.fingerprint).finish()
    }
}


//------------ Key -----------------------------------------------------------

/// A private key found on disk.
#[derive(Clone)]
pub struct Key {
    encrypted: bool,
    location: String,
    der: Arc<[u8]>,
    private: Option<PKey<Private>>,
    public: Option<PublicKey>,
}

impl Key {
    /// Creates a key that was readable as found.
    pub fn decrypted(
        location: String,
        der: impl Into<Arc<[u8]>>,
        private: PKey<Private>,
        public: PublicKey,
    ) -> Self {
        Key {
            encrypted: false,
            location,
            der: der.into(),
            private: Some(private),
            public: Some(public),
        }
    }

    /// Creates an encrypted key for which no public half is known yet.
    pub fn encrypted(location: String, der: impl Into<Arc<[u8]>>) -> Self {
        Key {
            encrypted: true,
            location,
            der: der.into(),
            private: None,
            public: None,
        }
    }

    /// Returns this key with its public half set.
    pub fn with_public(mut self, public: PublicKey) -> Self {
        self.public = Some(public);
        self
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    /// Returns the location of the private key block.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Returns the DER content of the private key block as found.
    ///
    /// For encrypted keys this is the ciphertext.
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn private_key(&self) -> Option<&PKey<Private>> {
        self.private.as_ref()
    }

    pub fn public_key(&self) -> Option<&PublicKey> {
        self.public.as_ref()
    }

    /// Returns whether both halves of this key are known.
    pub fn is_complete(&self) -> bool {
        self.public.is_some()
    }

    pub fn identifier(&self) -> KeyId {
        match &self.public {
            Some(public) => KeyId::Fingerprint(public.fingerprint()),
            None => KeyId::Provisional(Fingerprint::of(&self.der)),
        }
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Key")
            .field("encrypted", &self.encrypted)
            .field("location", &self.location)
            .field("id", &self.identifier())
            .finish()
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.location == other.location
            && self.der == other.der
            && self.public == other.public
    }
}

impl Eq for Key {}


//------------ Certificate ---------------------------------------------------

/// An X.509 certificate found on disk.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Certificate {
    location: String,
    der: Arc<[u8]>,
    fingerprint: Fingerprint,
    subject: String,
    issuer: String,
    serial: String,
    not_after: String,
    public_key: PublicKey,
}

impl Certificate {
    pub fn new(
        location: String,
        der: impl Into<Arc<[u8]>>,
        subject: String,
        issuer: String,
        serial: String,
        not_after: String,
        public_key: PublicKey,
    ) -> Self {
        let der = der.into();
        let fingerprint = Fingerprint::of(&der);
        Certificate {
            location,
            der,
            fingerprint,
            subject,
            issuer,
            serial,
            not_after,
            public_key,
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Returns the fingerprint of the whole certificate.
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// Returns the subject as a comma separated distinguished name.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Returns the serial number in upper case hex.
    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn not_after(&self) -> &str {
        &self.not_after
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn is_self_issued(&self) -> bool {
        self.subject == self.issuer
    }
}


//------------ Identity ------------------------------------------------------

/// A private key together with a certificate for its public key.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Identity {
    key: Key,
    certificate: Certificate,
}

impl Identity {
    pub fn new(key: Key, certificate: Certificate) -> Self {
        Identity { key, certificate }
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }
}


//------------ fold_location -------------------------------------------------

/// Normalizes a location so that related files map to the same string.
///
/// A trailing block index (`file.pem:2`) is removed first, then the
/// extension of the final path component. A leading dot does not start
/// an extension. This lets `keys/bob.key`, `keys/bob.pub` and the second
/// block of `keys/bob.pem` all fold to `keys/bob`.
pub fn fold_location(location: &str) -> String {
    let location = match location.rsplit_once(':') {
        Some((base, index))
            if !index.is_empty()
                && index.bytes().all(|b| b.is_ascii_digit()) =>
        {
            base
        }
        _ => location,
    };

    let name_start = location
        .rfind(['/', '\\'])
        .map(|pos| pos + 1)
        .unwrap_or(0);

    match location[name_start..].rfind('.') {
        Some(dot) if dot > 0 => location[..name_start + dot].to_string(),
        _ => location.to_string(),
    }
}


//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_location_strips_index_and_extension() {
        assert_eq!(fold_location("certs/alice.pem:2"), "certs/alice");
        assert_eq!(fold_location("certs/alice"), "certs/alice");
        assert_eq!(
            fold_location("certs/alice.pem:2"),
            fold_location("certs/alice")
        );
        assert_eq!(fold_location("keys/bob.key"), "keys/bob");
        assert_eq!(fold_location("keys/bob.pub"), "keys/bob");
        assert_eq!(fold_location("keys/bob.tar.gz"), "keys/bob.tar");
    }

    #[test]
    fn fold_location_leaves_dots_outside_file_name() {
        assert_eq!(fold_location("etc.d/server"), "etc.d/server");
        assert_eq!(fold_location("etc.d/.hidden"), "etc.d/.hidden");
        assert_eq!(fold_location(".hidden.pem"), ".hidden");
        assert_eq!(fold_location("C:\\keys\\web.pem"), "C:\\keys\\web");
    }

    #[test]
    fn fold_location_only_strips_numeric_suffixes() {
        assert_eq!(fold_location("host:port/file.pem"), "host:port/file");
        assert_eq!(fold_location("notes:v2"), "notes:v2");
        assert_eq!(fold_location("notes:"), "notes:");
        assert_eq!(fold_location("file.pem:10"), "file");
    }

    #[test]
    fn key_id_matches_declared_hex() {
        let fp = Fingerprint::of(b"ciphertext");
        let id = KeyId::Provisional(fp);
        assert!(id.is_provisional());
        assert!(id.matches_declared(&fp.to_string().to_uppercase()));
        assert!(id.matches_declared(&format!(" {fp}\n")));
        assert!(!id.matches_declared("00"));
        assert_eq!(id.to_string(), format!("~{fp}"));
    }

    #[test]
    fn key_identifier_follows_public_half() {
        let key = Key::encrypted("k.pem".into(), b"secret".to_vec());
        assert!(key.identifier().is_provisional());
        assert!(!key.is_complete());

        let public = PublicKey::from_der(b"spki".to_vec());
        let key = key.with_public(public.clone());
        assert_eq!(key.identifier(), KeyId::Fingerprint(public.fingerprint()));
        assert!(key.is_complete());
        assert!(key.is_encrypted());
    }
}
