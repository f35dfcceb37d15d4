//! Pairing keys with certificates.

use std::collections::{HashMap, HashSet};

use log::{debug, info, warn};

use crate::keys::{fold_location, Certificate, Fingerprint, Identity, Key};
use crate::source::{BlockKind, PemBlock};
use super::keys::KeyMatcher;


//------------ IdentityMatcher -----------------------------------------------

/// Turns a stream of key and certificate blocks into identities.
///
/// Keys are completed by a [`KeyMatcher`] first. Complete keys are then
/// paired with every certificate for the same public key, no matter in
/// which order they arrive. A key stays available for the whole scan so
/// that renewed certificates for it keep matching.
///
/// A certificate also carries a public key, so it can complete an
/// encrypted key stored next to it that has no public key block of its
/// own. This location fallback only ever applies to such parked
/// encrypted keys. Complete keys are matched by fingerprint alone.
///
/// Further copies of a key already known are not paired again. They are
/// reported as remaining keys instead.
#[derive(Debug)]
pub struct IdentityMatcher {
    keys: KeyMatcher,

    /// Complete keys by the fingerprint of their public key.
    by_fingerprint: HashMap<Fingerprint, IndexedKey>,

    /// Copies of keys that were already indexed.
    duplicates: Vec<Key>,

    /// Certificates waiting for their key, by public key fingerprint.
    pending_certs: HashMap<Fingerprint, Vec<Certificate>>,

    /// Public key fingerprints of waiting certificates, by folded
    /// location.
    pending_locations: HashMap<String, Fingerprint>,

    /// Fingerprints of all certificates seen so far.
    seen_certs: HashSet<Fingerprint>,
}

#[derive(Debug)]
struct IndexedKey {
    key: Key,
    matched: bool,
}

impl IdentityMatcher {
    pub fn new(keys: KeyMatcher) -> Self {
        IdentityMatcher {
            keys,
            by_fingerprint: HashMap::new(),
            duplicates: Vec::new(),
            pending_certs: HashMap::new(),
            pending_locations: HashMap::new(),
            seen_certs: HashSet::new(),
        }
    }

    /// Processes the next block.
    ///
    /// Returns the identities that became known through this block.
    pub fn add_block(&mut self, block: &PemBlock) -> Vec<Identity> {
        match block.kind() {
            BlockKind::Certificate => self.add_certificate(block),
            BlockKind::PrivateKeyEncrypted => {
                match self.keys.add_block(block) {
                    Some(key) => self.add_key(key),
                    None => self.complete_from_certificate(block.location()),
                }
            }
            BlockKind::PrivateKey | BlockKind::PublicKey => {
                match self.keys.add_block(block) {
                    Some(key) => self.add_key(key),
                    None => Vec::new(),
                }
            }
            BlockKind::Other(_) => Vec::new(),
        }
    }

    fn add_certificate(&mut self, block: &PemBlock) -> Vec<Identity> {
        let cert = match block.decode_certificate() {
            Ok(cert) => cert,
            Err(e) => {
                warn!(
                    "Ignoring unreadable certificate at {}: {}",
                    block.location(),
                    e
                );
                return Vec::new();
            }
        };

        if !self.seen_certs.insert(cert.fingerprint()) {
            debug!(
                "Certificate at {} was seen before, skipping",
                cert.location()
            );
            return Vec::new();
        }

        let fingerprint = cert.public_key().fingerprint();
        if let Some(indexed) = self.by_fingerprint.get_mut(&fingerprint) {
            indexed.matched = true;
            debug!(
                "Certificate at {} matched key at {}",
                cert.location(),
                indexed.key.location()
            );
            return vec![Identity::new(indexed.key.clone(), cert)];
        }

        let fold = fold_location(cert.location());
        if let Some(key) =
            self.keys.complete_anonymous(&fold, cert.public_key().clone())
        {
            debug!(
                "Certificate at {} completed encrypted key at {}",
                cert.location(),
                key.location()
            );
            let mut res = self.add_key(key.clone());
            self.mark_matched(&fingerprint);
            res.push(Identity::new(key, cert));
            return res;
        }

        self.pending_locations.insert(fold, fingerprint);
        self.pending_certs.entry(fingerprint).or_default().push(cert);
        Vec::new()
    }

    /// Tries to complete a freshly parked encrypted key from a waiting
    /// certificate at the same folded location.
    fn complete_from_certificate(&mut self, location: &str) -> Vec<Identity> {
        let fold = fold_location(location);
        if !self.keys.has_anonymous(&fold) {
            return Vec::new();
        }
        let public = match self
            .pending_locations
            .get(&fold)
            .and_then(|fp| self.pending_certs.get(fp))
            .and_then(|certs| certs.first())
        {
            Some(cert) => cert.public_key().clone(),
            None => return Vec::new(),
        };
        match self.keys.complete_anonymous(&fold, public) {
            Some(key) => {
                debug!(
                    "Encrypted key at {} completed by a certificate next \
                     to it",
                    key.location()
                );
                self.add_key(key)
            }
            None => Vec::new(),
        }
    }

    /// Indexes a complete key and pairs it with waiting certificates.
    fn add_key(&mut self, key: Key) -> Vec<Identity> {
        let fingerprint = match key.public_key() {
            Some(public) => public.fingerprint(),
            None => return Vec::new(),
        };

        if let Some(existing) = self.by_fingerprint.get(&fingerprint) {
            info!(
                "Key at {} is a copy of the key at {}, not pairing it again",
                key.location(),
                existing.key.location()
            );
            self.duplicates.push(key);
            return Vec::new();
        }

        let certs = self.pending_certs.remove(&fingerprint).unwrap_or_default();
        for cert in &certs {
            let fold = fold_location(cert.location());
            if self.pending_locations.get(&fold) == Some(&fingerprint) {
                self.pending_locations.remove(&fold);
            }
        }

        let res = certs
            .into_iter()
            .map(|cert| {
                debug!(
                    "Key at {} matched waiting certificate at {}",
                    key.location(),
                    cert.location()
                );
                Identity::new(key.clone(), cert)
            })
            .collect::<Vec<_>>();

        self.by_fingerprint.insert(
            fingerprint,
            IndexedKey {
                key,
                matched: !res.is_empty(),
            },
        );
        res
    }

    fn mark_matched(&mut self, fingerprint: &Fingerprint) {
        if let Some(indexed) = self.by_fingerprint.get_mut(fingerprint) {
            indexed.matched = true;
        }
    }

    /// Returns all keys that did not end up in an identity.
    ///
    /// This includes complete keys without a certificate, encrypted keys
    /// whose public half never turned up and copies of keys found
    /// earlier. Only meaningful once all blocks have been added.
    pub fn remaining_keys(&self) -> Vec<Key> {
        let mut res = self
            .by_fingerprint
            .values()
            .filter(|indexed| !indexed.matched)
            .map(|indexed| indexed.key.clone())
            .chain(self.duplicates.iter().cloned())
            .chain(self.keys.unmatched_keys())
            .collect::<Vec<_>>();
        res.sort_by(|l, r| l.location().cmp(r.location()));
        res
    }

    /// Returns all certificates that did not find their key.
    pub fn remaining_certificates(&self) -> Vec<Certificate> {
        let mut res = self
            .pending_certs
            .values()
            .flatten()
            .cloned()
            .collect::<Vec<_>>();
        res.sort_by(|l, r| l.location().cmp(r.location()));
        res
    }
}


//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::constants::DEFAULT_KEY_ID_HEADER;
    use crate::test;

    fn matcher() -> IdentityMatcher {
        IdentityMatcher::new(KeyMatcher::new(DEFAULT_KEY_ID_HEADER))
    }

    fn pairs(identities: &[Identity]) -> HashSet<(String, String)> {
        identities
            .iter()
            .map(|identity| {
                (
                    identity.key().location().to_string(),
                    identity.certificate().location().to_string(),
                )
            })
            .collect()
    }

    #[test]
    fn key_before_certificates() {
        let pkey = test::new_key();
        let old = test::self_signed_cert(&pkey, "Alice", 1);
        let new = test::self_signed_cert(&pkey, "Alice", 2);
        let mut matcher = matcher();

        assert!(
            matcher
                .add_block(&test::private_key_block(&pkey, "alice.key"))
                .is_empty()
        );
        let mut found =
            matcher.add_block(&test::certificate_block(&old, "alice-2023.crt"));
        found.extend(
            matcher.add_block(&test::certificate_block(&new, "alice-2024.crt"))
        );

        assert_eq!(found.len(), 2);
        assert_eq!(pairs(&found).len(), 2);
        assert!(matcher.remaining_keys().is_empty());
        assert!(matcher.remaining_certificates().is_empty());
    }

    #[test]
    fn certificates_before_key() {
        let pkey = test::new_key();
        let old = test::self_signed_cert(&pkey, "Alice", 1);
        let new = test::self_signed_cert(&pkey, "Alice", 2);
        let mut matcher = matcher();

        assert!(
            matcher
                .add_block(&test::certificate_block(&old, "certs/1.crt"))
                .is_empty()
        );
        assert!(
            matcher
                .add_block(&test::certificate_block(&new, "certs/2.crt"))
                .is_empty()
        );
        assert_eq!(matcher.remaining_certificates().len(), 2);

        let found =
            matcher.add_block(&test::private_key_block(&pkey, "keys/alice.key"));
        assert_eq!(found.len(), 2);
        assert_eq!(pairs(&found).len(), 2);
        assert!(matcher.remaining_certificates().is_empty());
        assert!(matcher.remaining_keys().is_empty());
    }

    #[test]
    fn duplicate_certificate_is_matched_once() {
        let pkey = test::new_key();
        let cert = test::self_signed_cert(&pkey, "Alice", 1);
        let mut matcher = matcher();

        matcher.add_block(&test::private_key_block(&pkey, "alice.key"));
        let first =
            matcher.add_block(&test::certificate_block(&cert, "alice.crt"));
        let second = matcher
            .add_block(&test::certificate_block(&cert, "backup/alice.crt"));
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
    }

    #[test]
    fn encrypted_key_with_public_key_and_certificate() {
        let pkey = test::new_key();
        let cert = test::self_signed_cert(&pkey, "Bob", 1);
        let mut matcher = matcher();

        assert!(
            matcher
                .add_block(&test::certificate_block(&cert, "certs/bob.crt"))
                .is_empty()
        );
        assert!(
            matcher
                .add_block(&test::encrypted_key_block(&pkey, "keys/bob.key"))
                .is_empty()
        );
        let found = matcher
            .add_block(&test::public_key_block(&pkey, "keys/bob.pub", None));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].key().location(), "keys/bob.key");
        assert_eq!(found[0].certificate().location(), "certs/bob.crt");
    }

    #[test]
    fn certificate_completes_encrypted_key_next_to_it() {
        let pkey = test::new_key();
        let cert = test::self_signed_cert(&pkey, "Carol", 1);

        // Key first.
        let mut matcher = matcher();
        assert!(
            matcher
                .add_block(&test::encrypted_key_block(&pkey, "tls/carol.key"))
                .is_empty()
        );
        let found =
            matcher.add_block(&test::certificate_block(&cert, "tls/carol.crt"));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].key().location(), "tls/carol.key");
        assert!(!found[0].key().identifier().is_provisional());
        assert!(matcher.remaining_keys().is_empty());

        // Certificate first.
        let mut matcher = super::tests::matcher();
        assert!(
            matcher
                .add_block(&test::certificate_block(&cert, "tls/carol.crt"))
                .is_empty()
        );
        let found = matcher
            .add_block(&test::encrypted_key_block(&pkey, "tls/carol.key"));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].certificate().location(), "tls/carol.crt");
        assert!(matcher.remaining_keys().is_empty());
        assert!(matcher.remaining_certificates().is_empty());
    }

    #[test]
    fn certificate_does_not_pair_with_foreign_key_next_to_it() {
        let pkey = test::new_key();
        let other = test::new_key();
        let cert = test::self_signed_cert(&other, "Dave", 1);
        let mut matcher = matcher();

        matcher.add_block(&test::private_key_block(&pkey, "srv/dave.key"));
        assert!(
            matcher
                .add_block(&test::certificate_block(&cert, "srv/dave.crt"))
                .is_empty()
        );
        assert_eq!(matcher.remaining_keys().len(), 1);
        assert_eq!(matcher.remaining_certificates().len(), 1);
    }

    #[test]
    fn leftovers_are_reported() {
        let lonely = test::new_key();
        let encrypted = test::new_key();
        let orphan = test::new_key();
        let cert = test::self_signed_cert(&orphan, "Orphan", 1);
        let mut matcher = matcher();

        matcher.add_block(&test::private_key_block(&lonely, "a/lonely.key"));
        matcher.add_block(&test::encrypted_key_block(&encrypted, "b/enc.key"));
        matcher.add_block(&test::certificate_block(&cert, "c/orphan.crt"));

        let keys = matcher.remaining_keys();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].location(), "a/lonely.key");
        assert_eq!(keys[1].location(), "b/enc.key");
        assert!(keys[1].identifier().is_provisional());

        let certs = matcher.remaining_certificates();
        assert_eq!(certs.len(), 1);
        assert_eq!(certs[0].subject(), "CN=Orphan");
    }

    #[test]
    fn same_key_twice_reports_the_copy() {
        let pkey = test::new_key();
        let cert = test::self_signed_cert(&pkey, "Erin", 1);
        let mut matcher = matcher();

        matcher.add_block(&test::certificate_block(&cert, "erin.crt"));
        let first = matcher.add_block(&test::private_key_block(&pkey, "erin.key"));
        let second =
            matcher.add_block(&test::private_key_block(&pkey, "copy/erin.key"));
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].key().location(), "erin.key");
        assert!(second.is_empty());

        let keys = matcher.remaining_keys();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].location(), "copy/erin.key");
        assert!(matcher.remaining_certificates().is_empty());
    }
}
