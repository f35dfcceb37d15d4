//! Running a single correlation pass over a set of roots.
//!
//! Discovery runs on the blocking thread pool, one worker per root. All
//! discovered blocks are funnelled into a single task that owns the
//! matcher, so the matcher itself never needs to be shared. Results are
//! handed to the consumer through a [`ScanStream`] as soon as they are
//! known.

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::Stream;
use log::{debug, info, warn};
use serde::de;
use serde::{Deserialize, Deserializer};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::commons::file::CrawlOptions;
use crate::constants::{
    DEFAULT_BLOCK_QUEUE, DEFAULT_KEY_ID_HEADER, DEFAULT_MAX_FILE_SIZE,
    SCAN_RESULT_QUEUE,
};
use crate::matcher::{IdentityMatcher, KeyMatcher, Matcher, ScanItem};
use crate::source::{BlockSource, FileSource, PemBlock};


//------------ HiddenFiles ---------------------------------------------------

/// What to do with files and directories whose name starts with a dot.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum HiddenFiles {
    #[default]
    Skip,
    Include,
}

impl<'de> Deserialize<'de> for HiddenFiles {
    fn deserialize<D>(d: D) -> Result<HiddenFiles, D::Error>
    where
        D: Deserializer<'de>,
    {
        let string = String::deserialize(d)?;
        match string.as_str() {
            "skip" => Ok(HiddenFiles::Skip),
            "include" => Ok(HiddenFiles::Include),
            _ => Err(de::Error::custom(format!(
                "expected \"skip\" or \"include\", found : \"{}\"",
                string
            ))),
        }
    }
}


//------------ ScanOptions ---------------------------------------------------

/// Everything that influences how a scan finds and matches blocks.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ScanOptions {
    pub recursive: bool,
    pub hidden_files: HiddenFiles,
    pub max_file_size: u64,

    /// The PEM header through which public keys declare their key.
    pub key_id_header: String,

    /// Do not report leftovers at the end of a scan.
    pub suppress_unmatched: bool,

    /// The number of blocks buffered between discovery and matching.
    pub block_queue: usize,
}

impl ScanOptions {
    pub fn crawl_options(&self) -> CrawlOptions {
        CrawlOptions {
            recursive: self.recursive,
            include_hidden: self.hidden_files == HiddenFiles::Include,
            max_file_size: self.max_file_size,
        }
    }
}

impl Default for ScanOptions {
    fn default() -> Self {
        ScanOptions {
            recursive: true,
            hidden_files: HiddenFiles::Skip,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            key_id_header: DEFAULT_KEY_ID_HEADER.to_string(),
            suppress_unmatched: false,
            block_queue: DEFAULT_BLOCK_QUEUE,
        }
    }
}


//------------ ScanMode ------------------------------------------------------

/// What a scan is looking for.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScanMode {
    /// Keys with both halves known.
    Keys,

    /// Keys paired with their certificates.
    Identities,
}


//------------ Scanner -------------------------------------------------------

/// Starts correlation passes over filesystem roots.
///
/// A scanner is cheap to clone. Scans must be started from within a
/// Tokio runtime.
pub struct Scanner<S = FileSource> {
    source: Arc<S>,
    options: Arc<ScanOptions>,
}

impl Scanner<FileSource> {
    /// Creates a scanner reading from the local filesystem.
    pub fn new(options: ScanOptions) -> Self {
        Scanner::with_source(FileSource::new(&options), options)
    }
}

impl<S: BlockSource> Scanner<S> {
    pub fn with_source(source: S, options: ScanOptions) -> Self {
        Scanner {
            source: Arc::new(source),
            options: Arc::new(options),
        }
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// Finds all keys below the roots.
    ///
    /// Encrypted keys whose public half is never found are reported as
    /// unmatched at the end.
    pub fn find_keys(
        &self,
        cancel: CancellationToken,
        roots: Vec<PathBuf>,
    ) -> ScanStream {
        self.scan(ScanMode::Keys, cancel, roots)
    }

    /// Finds all identities below the roots.
    ///
    /// Keys without a certificate and certificates without a key are
    /// reported as unmatched at the end.
    pub fn find_identities(
        &self,
        cancel: CancellationToken,
        roots: Vec<PathBuf>,
    ) -> ScanStream {
        self.scan(ScanMode::Identities, cancel, roots)
    }

    pub fn scan(
        &self,
        mode: ScanMode,
        cancel: CancellationToken,
        roots: Vec<PathBuf>,
    ) -> ScanStream {
        let keys = KeyMatcher::new(self.options.key_id_header.clone());
        match mode {
            ScanMode::Keys => self.start(keys, cancel, roots),
            ScanMode::Identities => {
                self.start(IdentityMatcher::new(keys), cancel, roots)
            }
        }
    }

    fn start<M: Matcher>(
        &self,
        matcher: M,
        cancel: CancellationToken,
        roots: Vec<PathBuf>,
    ) -> ScanStream {
        let (block_tx, block_rx) =
            mpsc::channel(self.options.block_queue.max(1));
        let (item_tx, item_rx) = mpsc::channel(SCAN_RESULT_QUEUE);

        info!("Scanning {} root(s)", roots.len());
        for root in roots {
            let source = self.source.clone();
            let block_tx = block_tx.clone();
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || {
                walk_root(source.as_ref(), &root, &block_tx, &cancel)
            });
        }
        drop(block_tx);

        tokio::spawn(correlate(
            matcher,
            block_rx,
            item_tx,
            cancel,
            self.options.suppress_unmatched,
        ));

        ScanStream { rx: item_rx }
    }
}

impl<S> Clone for Scanner<S> {
    fn clone(&self) -> Self {
        Scanner {
            source: self.source.clone(),
            options: self.options.clone(),
        }
    }
}

fn walk_root<S: BlockSource>(
    source: &S,
    root: &Path,
    blocks: &mpsc::Sender<PemBlock>,
    cancel: &CancellationToken,
) {
    let res = source.walk(root, cancel, &mut |block| {
        if cancel.is_cancelled() {
            return false;
        }
        // Fails once the correlation task has gone away.
        blocks.blocking_send(block).is_ok()
    });
    match res {
        Ok(()) => debug!("Finished walking {}", root.display()),
        Err(e) => warn!("Cannot scan {}: {}", root.display(), e),
    }
}

/// Feeds all blocks into the matcher and forwards what it finds.
async fn correlate<M: Matcher>(
    mut matcher: M,
    mut blocks: mpsc::Receiver<PemBlock>,
    items: mpsc::Sender<ScanItem>,
    cancel: CancellationToken,
    suppress_unmatched: bool,
) {
    loop {
        let block = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Scan cancelled");
                return;
            }
            block = blocks.recv() => block,
        };
        let Some(block) = block else { break };
        for item in matcher.add_block(&block) {
            if !forward(&items, &cancel, item).await {
                return;
            }
        }
    }

    if suppress_unmatched {
        debug!("Scan complete, not reporting leftovers");
        return;
    }
    let leftovers = matcher.finish();
    debug!("Scan complete, {} leftover(s)", leftovers.len());
    for item in leftovers {
        if !forward(&items, &cancel, item).await {
            return;
        }
    }
}

/// Sends an item to the consumer, returning whether to keep going.
async fn forward(
    items: &mpsc::Sender<ScanItem>,
    cancel: &CancellationToken,
    item: ScanItem,
) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        res = items.send(item) => res.is_ok(),
    }
}


//------------ ScanStream ----------------------------------------------------

/// The results of a running scan.
///
/// The stream ends when the scan is complete or was cancelled. Dropping
/// it stops the scan.
#[derive(Debug)]
pub struct ScanStream {
    rx: mpsc::Receiver<ScanItem>,
}

impl ScanStream {
    pub async fn next(&mut self) -> Option<ScanItem> {
        self.rx.recv().await
    }

    /// Waits for the scan to finish and returns all of its results.
    pub async fn collect(mut self) -> Vec<ScanItem> {
        let mut res = Vec::new();
        while let Some(item) = self.rx.recv().await {
            res.push(item);
        }
        res
    }
}

impl Stream for ScanStream {
    type Item = ScanItem;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}


//------------ Tests ---------------------------------------------------------
