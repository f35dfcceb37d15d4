//! Turning scan results into cache entries.

use crate::keys::{Identity, Key};
use crate::matcher::ScanItem;
use crate::scanner::ScanMode;


//------------ IndexEntry ----------------------------------------------------

/// A value stored in an [`IndexCache`][super::IndexCache] under a key.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IndexEntry<V> {
    key: String,
    value: V,
}

impl<V> IndexEntry<V> {
    pub fn new(key: impl Into<String>, value: V) -> Self {
        IndexEntry {
            key: key.into(),
            value,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &V {
        &self.value
    }
}


//------------ Indexer -------------------------------------------------------

/// Decides what a cache scans for and how results are keyed.
pub trait Indexer: Send + Sync + 'static {
    type Value: Clone + Send + Sync + 'static;

    /// The kind of scan that feeds the cache.
    fn mode(&self) -> ScanMode;

    /// Returns the entries for a scan result.
    ///
    /// Items the cache is not interested in result in an empty vec.
    fn index(&self, item: &ScanItem) -> Vec<IndexEntry<Self::Value>>;
}


//------------ IdentityIndexer -----------------------------------------------

/// Indexes identities by the subject of their certificate.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentityIndexer;

impl Indexer for IdentityIndexer {
    type Value = Identity;

    fn mode(&self) -> ScanMode {
        ScanMode::Identities
    }

    fn index(&self, item: &ScanItem) -> Vec<IndexEntry<Identity>> {
        match item {
            ScanItem::Identity(identity) => vec![IndexEntry::new(
                identity.certificate().subject(),
                identity.clone(),
            )],
            _ => Vec::new(),
        }
    }
}


//------------ KeyIndexer ----------------------------------------------------

/// Indexes keys by their identifier.
///
/// Encrypted keys that never found their public half are included under
/// their provisional identifier.
#[derive(Clone, Copy, Debug, Default)]
pub struct KeyIndexer;

impl Indexer for KeyIndexer {
    type Value = Key;

    fn mode(&self) -> ScanMode {
        ScanMode::Keys
    }

    fn index(&self, item: &ScanItem) -> Vec<IndexEntry<Key>> {
        match item {
            ScanItem::Key(key) | ScanItem::UnmatchedKey(key) => {
                vec![IndexEntry::new(key.identifier().to_string(), key.clone())]
            }
            _ => Vec::new(),
        }
    }
}


//------------ Tests ---------------------------------------------------------
