//! Pairing private keys with their public halves.

use std::collections::HashMap;

use log::{debug, warn};

use crate::keys::{fold_location, Key, PublicKey};
use crate::source::{BlockKind, PemBlock};


//------------ KeyMatcher ----------------------------------------------------

/// Turns a stream of key blocks into keys with known public halves.
///
/// Unencrypted private keys carry their public half and are returned
/// right away. Encrypted keys have to wait for a public key block that
/// either lives at the same folded location or declares the encrypted
/// key's identifier in a header. Public keys that arrive first wait for
/// their private key in the same way.
///
/// Blocks may arrive in any order. A matcher is not meant to be shared
/// between tasks; the scanner feeds it from a single task.
#[derive(Debug)]
pub struct KeyMatcher {
    /// The header a public key uses to declare its private key.
    key_id_header: String,

    /// Encrypted keys waiting for a public key, by folded location.
    anons: HashMap<String, Key>,

    /// Public keys waiting for a private key, by folded location.
    puks: HashMap<String, PendingPublicKey>,

    /// Public keys waiting for a private key, by declared identifier.
    id_puks: HashMap<String, PendingPublicKey>,

    /// Encrypted keys pushed out of `anons` by a later key at the same
    /// folded location.
    displaced: Vec<Key>,
}

#[derive(Clone, Debug)]
struct PendingPublicKey {
    location: String,
    key: PublicKey,
}

impl KeyMatcher {
    pub fn new(key_id_header: impl Into<String>) -> Self {
        KeyMatcher {
            key_id_header: key_id_header.into(),
            anons: HashMap::new(),
            puks: HashMap::new(),
            id_puks: HashMap::new(),
            displaced: Vec::new(),
        }
    }

    /// Processes the next block.
    ///
    /// Returns a key once both of its halves are known. Blocks that are
    /// not keys are ignored.
    pub fn add_block(&mut self, block: &PemBlock) -> Option<Key> {
        match block.kind() {
            BlockKind::PrivateKey => self.add_private_key(block),
            BlockKind::PrivateKeyEncrypted => {
                self.add_encrypted_key(block)
            }
            BlockKind::PublicKey => self.add_public_key(block),
            _ => None,
        }
    }

    fn add_private_key(&mut self, block: &PemBlock) -> Option<Key> {
        match block.decode_private_key() {
            Ok((private, public)) => Some(Key::decrypted(
                block.location().to_string(),
                block.der_shared(),
                private,
                public,
            )),
            Err(e) => {
                warn!(
                    "Ignoring unreadable private key at {}: {}",
                    block.location(),
                    e
                );
                None
            }
        }
    }

    fn add_encrypted_key(&mut self, block: &PemBlock) -> Option<Key> {
        let key =
            Key::encrypted(block.location().to_string(), block.der_shared());

        let id = block.provisional_id().to_string();
        if let Some(public) = self.id_puks.remove(&id) {
            debug!(
                "Encrypted key at {} matched public key at {} by identifier",
                block.location(),
                public.location
            );
            return Some(key.with_public(public.key));
        }

        let fold = fold_location(block.location());
        if let Some(public) = self.puks.remove(&fold) {
            debug!(
                "Encrypted key at {} matched public key at {} by location",
                block.location(),
                public.location
            );
            return Some(key.with_public(public.key));
        }

        if let Some(previous) = self.anons.insert(fold, key) {
            warn!(
                "Encrypted key at {} replaces {} as the pending key for \
                 this location",
                block.location(),
                previous.location()
            );
            self.displaced.push(previous);
        }
        None
    }

    fn add_public_key(&mut self, block: &PemBlock) -> Option<Key> {
        let public = match block.decode_public_key() {
            Ok(public) => PendingPublicKey {
                location: block.location().to_string(),
                key: public,
            },
            Err(e) => {
                warn!(
                    "Ignoring unreadable public key at {}: {}",
                    block.location(),
                    e
                );
                return None;
            }
        };

        if let Some(id) = block.declared_id(&self.key_id_header) {
            if let Some(key) = self.take_anonymous_by_id(id) {
                debug!(
                    "Public key at {} matched encrypted key at {} by \
                     identifier",
                    public.location,
                    key.location()
                );
                return Some(key.with_public(public.key));
            }
            let id = id.to_ascii_lowercase();
            if let Some(previous) = self.id_puks.insert(id, public) {
                warn!(
                    "Public key at {} replaces {} as the pending key for \
                     its identifier",
                    block.location(),
                    previous.location
                );
            }
            return None;
        }

        let fold = fold_location(block.location());
        if let Some(key) = self.anons.remove(&fold) {
            debug!(
                "Public key at {} matched encrypted key at {} by location",
                public.location,
                key.location()
            );
            return Some(key.with_public(public.key));
        }

        if let Some(previous) = self.puks.insert(fold, public) {
            warn!(
                "Public key at {} replaces {} as the pending key for this \
                 location",
                block.location(),
                previous.location
            );
        }
        None
    }

    fn take_anonymous_by_id(&mut self, id: &str) -> Option<Key> {
        let fold = self
            .anons
            .iter()
            .find(|(_, key)| key.identifier().matches_declared(id))
            .map(|(fold, _)| fold.clone());
        if let Some(fold) = fold {
            return self.anons.remove(&fold);
        }

        let pos = self
            .displaced
            .iter()
            .position(|key| key.identifier().matches_declared(id))?;
        Some(self.displaced.remove(pos))
    }

    /// Returns whether an encrypted key is waiting at a folded location.
    pub fn has_anonymous(&self, fold: &str) -> bool {
        self.anons.contains_key(fold)
    }

    /// Completes the encrypted key waiting at a folded location.
    ///
    /// This is used when the public half turns up in some other form than
    /// a public key block, such as a certificate.
    pub fn complete_anonymous(
        &mut self,
        fold: &str,
        public: PublicKey,
    ) -> Option<Key> {
        self.anons.remove(fold).map(|key| key.with_public(public))
    }

    /// Returns all encrypted keys that never found their public half.
    ///
    /// Only meaningful once all blocks have been added.
    pub fn unmatched_keys(&self) -> Vec<Key> {
        let mut res = self
            .anons
            .values()
            .chain(self.displaced.iter())
            .cloned()
            .collect::<Vec<_>>();
        res.sort_by(|l, r| l.location().cmp(r.location()));
        res
    }

    /// Returns the locations of public keys that never found their
    /// private key.
    pub fn unmatched_public_keys(&self) -> Vec<(String, PublicKey)> {
        let mut res = self
            .puks
            .values()
            .chain(self.id_puks.values())
            .map(|pending| (pending.location.clone(), pending.key.clone()))
            .collect::<Vec<_>>();
        res.sort_by(|l, r| l.0.cmp(&r.0));
        res
    }
}


//------------ Tests ---------------------------------------------------------
