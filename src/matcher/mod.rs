//! Correlating PEM blocks into keys and identities.

pub mod identity;
pub mod keys;

pub use self::identity::IdentityMatcher;
pub use self::keys::KeyMatcher;

use log::debug;

use crate::keys::{Certificate, Identity, Key};
use crate::source::PemBlock;


//------------ ScanItem ------------------------------------------------------

/// Something a scan reports.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ScanItem {
    /// A key with both halves known.
    Key(Key),

    /// A key paired with a certificate.
    Identity(Identity),

    /// A key that never found a partner, reported when the scan ends.
    UnmatchedKey(Key),

    /// A certificate that never found its key, reported when the scan
    /// ends.
    UnmatchedCertificate(Certificate),
}

impl ScanItem {
    /// Returns whether this item is one of the leftovers of a scan.
    pub fn is_unmatched(&self) -> bool {
        matches!(
            self,
            ScanItem::UnmatchedKey(_) | ScanItem::UnmatchedCertificate(_)
        )
    }
}


//------------ Matcher -------------------------------------------------------

/// A correlation strategy driven by a scan.
///
/// The scanner feeds all blocks of a scan into a single matcher from one
/// task, then calls [`finish`][Self::finish] exactly once.
pub trait Matcher: Send + 'static {
    /// Processes a block, returning whatever became known through it.
    fn add_block(&mut self, block: &PemBlock) -> Vec<ScanItem>;

    /// Returns everything that is left over once all blocks were added.
    fn finish(&mut self) -> Vec<ScanItem>;
}

impl Matcher for KeyMatcher {
    fn add_block(&mut self, block: &PemBlock) -> Vec<ScanItem> {
        KeyMatcher::add_block(self, block)
            .map(ScanItem::Key)
            .into_iter()
            .collect()
    }

    fn finish(&mut self) -> Vec<ScanItem> {
        for (location, public) in self.unmatched_public_keys() {
            debug!(
                "Public key {} at {} has no private key",
                public.fingerprint(),
                location
            );
        }
        self.unmatched_keys()
            .into_iter()
            .map(ScanItem::UnmatchedKey)
            .collect()
    }
}

impl Matcher for IdentityMatcher {
    fn add_block(&mut self, block: &PemBlock) -> Vec<ScanItem> {
        IdentityMatcher::add_block(self, block)
            .into_iter()
            .map(ScanItem::Identity)
            .collect()
    }

    fn finish(&mut self) -> Vec<ScanItem> {
        self.remaining_keys()
            .into_iter()
            .map(ScanItem::UnmatchedKey)
            .chain(
                self.remaining_certificates()
                    .into_iter()
                    .map(ScanItem::UnmatchedCertificate),
            )
            .collect()
    }
}
