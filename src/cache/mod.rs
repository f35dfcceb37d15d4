//! A queryable index over repeated scans.
//!
//! An [`IndexCache`] answers lookups while the scan that fills it is still
//! running. A lookup for a key that is already known is answered right
//! away. A lookup for anything else waits until either the entry turns up
//! or the scan is complete, at which point the answer is definitive.
//!
//! All state lives with a single owner task. The cache handle and the
//! scan producers talk to it through one command channel, so there is no
//! locking around the entries.

mod indexer;

pub use self::indexer::{
    IdentityIndexer, IndexEntry, Indexer, KeyIndexer,
};

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, info, trace};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::scanner::{ScanStream, Scanner};
use crate::source::BlockSource;


//------------ CacheState ----------------------------------------------------

/// The lifecycle state of an index cache.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CacheState {
    /// No refresh has been requested yet.
    Idle,

    /// A scan is running. Answers about absent keys are not final.
    Active,

    /// All scans are complete. Every answer is final.
    Passive,
}

impl fmt::Display for CacheState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CacheState::Idle => write!(f, "idle"),
            CacheState::Active => write!(f, "active"),
            CacheState::Passive => write!(f, "passive"),
        }
    }
}


//------------ IndexCache ----------------------------------------------------

/// A long-lived index of scan results.
///
/// The cache must be created from within a Tokio runtime. Dropping it
/// shuts it down.
pub struct IndexCache<V> {
    commands: mpsc::UnboundedSender<Command<V>>,
    paths: watch::Sender<Vec<PathBuf>>,
    state: Arc<watch::Sender<CacheState>>,
    cancel: CancellationToken,
}

impl<V: Clone + Send + Sync + 'static> IndexCache<V> {
    pub fn new<S, I>(scanner: Scanner<S>, indexer: I) -> Self
    where
        S: BlockSource,
        I: Indexer<Value = V>,
    {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (paths_tx, paths_rx) = watch::channel(Vec::new());
        let (state, _) = watch::channel(CacheState::Idle);
        let state = Arc::new(state);
        let cancel = CancellationToken::new();

        let owner = Owner {
            scanner,
            indexer: Arc::new(indexer),
            paths: paths_rx,
            commands: commands_tx.clone(),
            state: state.clone(),
            cancel: cancel.clone(),
            generation: 0,
            producer: None,
            outstanding: 0,
            entries: Vec::new(),
            latest: HashMap::new(),
            waiting: HashMap::new(),
            waiting_all: Vec::new(),
        };
        tokio::spawn(owner.run(commands_rx));

        IndexCache {
            commands: commands_tx,
            paths: paths_tx,
            state,
            cancel,
        }
    }

    /// Starts a new scan over the given paths.
    ///
    /// Entries of earlier scans are dropped and a still running scan is
    /// cancelled. Requests that are waiting for an answer keep waiting
    /// and are answered from the new scan. Several refreshes in quick
    /// succession only start one scan, over the latest paths.
    pub fn refresh(&self, paths: Vec<PathBuf>) {
        // Publishing the paths and leaving the passive state must appear
        // as one step to the owner.
        self.state.send_modify(|state| {
            self.paths.send_replace(paths);
            *state = CacheState::Active;
        });
        let _ = self.commands.send(Command::Refresh);
    }

    /// Looks up the most recent entry for a key.
    ///
    /// If the key is not known yet, waits until it is or until the cache
    /// becomes passive. The empty key never matches anything.
    pub async fn get(&self, key: &str) -> Option<IndexEntry<V>> {
        let mut rx = self.request(Query::Key(key.to_string()))?;
        rx.recv().await
    }

    /// Returns all entries once the cache is passive.
    pub async fn get_all(&self) -> Vec<IndexEntry<V>> {
        let mut res = Vec::new();
        if let Some(mut rx) = self.request(Query::All) {
            while let Some(entry) = rx.recv().await {
                res.push(entry);
            }
        }
        res
    }

    fn request(
        &self,
        query: Query,
    ) -> Option<mpsc::UnboundedReceiver<IndexEntry<V>>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.commands
            .send(Command::Request(Request { query, tx }))
            .ok()?;
        Some(rx)
    }
}

impl<V> IndexCache<V> {
    pub fn state(&self) -> CacheState {
        *self.state.borrow()
    }

    pub fn is_passive(&self) -> bool {
        self.state() == CacheState::Passive
    }

    /// Waits until the cache is passive or shut down.
    pub async fn wait_passive(&self) {
        let mut state = self.state.subscribe();
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = state.wait_for(|state| *state == CacheState::Passive) => {}
        }
    }

    /// Stops the cache and any running scan.
    ///
    /// All waiting requests resolve empty, as do all later ones.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl<V> Drop for IndexCache<V> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}


//------------ Command -------------------------------------------------------

enum Command<V> {
    /// New paths have been published.
    Refresh,

    /// A producer has indexed scan results.
    Indexed {
        generation: u64,
        entries: Vec<IndexEntry<V>>,
    },

    /// A producer has finished.
    Done { generation: u64 },

    Request(Request<V>),
}

enum Query {
    Key(String),
    All,
}

/// A lookup waiting for its answer.
///
/// The answer is sent through `tx`. Dropping `tx` closes the request.
struct Request<V> {
    query: Query,
    tx: mpsc::UnboundedSender<IndexEntry<V>>,
}


//------------ Owner ---------------------------------------------------------

/// The task owning the contents of a cache.
struct Owner<S, I: Indexer> {
    scanner: Scanner<S>,
    indexer: Arc<I>,
    paths: watch::Receiver<Vec<PathBuf>>,
    commands: mpsc::UnboundedSender<Command<I::Value>>,
    state: Arc<watch::Sender<CacheState>>,
    cancel: CancellationToken,

    /// The number of the current refresh.
    generation: u64,

    /// Cancels the producer of the current generation.
    producer: Option<CancellationToken>,

    /// The number of producers that have not finished yet.
    outstanding: usize,

    /// All entries of the current generation in arrival order.
    entries: Vec<IndexEntry<I::Value>>,

    /// The index of the most recent entry for each key.
    latest: HashMap<String, usize>,

    /// Key lookups waiting for their entry.
    waiting: HashMap<String, Vec<mpsc::UnboundedSender<IndexEntry<I::Value>>>>,

    /// Requests for all entries waiting for the passive state.
    waiting_all: Vec<mpsc::UnboundedSender<IndexEntry<I::Value>>>,
}

impl<S: BlockSource, I: Indexer> Owner<S, I> {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command<I::Value>>,
    ) {
        loop {
            let command = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };
            match command {
                Command::Refresh => self.refresh(),
                Command::Indexed {
                    generation,
                    entries,
                } => self.indexed(generation, entries),
                Command::Done { generation } => self.done(generation),
                Command::Request(request) => self.request(request),
            }
        }

        // Producers hold child tokens and stop along with us. Dropping
        // the waiting senders resolves their requests empty.
        debug!("Index cache shut down");
    }

    fn refresh(&mut self) {
        if !matches!(self.paths.has_changed(), Ok(true)) {
            trace!("No new paths, ignoring refresh signal");
            return;
        }
        let paths = self.paths.borrow_and_update().clone();

        if let Some(producer) = self.producer.take() {
            debug!("Cancelling scan of generation {}", self.generation);
            producer.cancel();
        }
        self.generation += 1;
        self.entries.clear();
        self.latest.clear();

        info!(
            "Refreshing index cache over {} path(s), generation {}",
            paths.len(),
            self.generation
        );
        let token = self.cancel.child_token();
        let stream =
            self.scanner.scan(self.indexer.mode(), token.clone(), paths);
        self.producer = Some(token);
        self.outstanding += 1;
        self.state.send_replace(CacheState::Active);

        tokio::spawn(produce(
            self.generation,
            stream,
            self.indexer.clone(),
            self.commands.clone(),
        ));
    }

    fn indexed(&mut self, generation: u64, entries: Vec<IndexEntry<I::Value>>) {
        if generation != self.generation {
            trace!(
                "Dropping {} entries of stale generation {}",
                entries.len(),
                generation
            );
            return;
        }

        for entry in entries {
            if let Some(waiters) = self.waiting.remove(entry.key()) {
                for tx in waiters {
                    let _ = tx.send(entry.clone());
                }
            }
            let pos = self.entries.len();
            if self.latest.insert(entry.key().to_string(), pos).is_some() {
                debug!(
                    "Entry for '{}' replaces an earlier one",
                    entry.key()
                );
            }
            self.entries.push(entry);
        }
    }

    fn done(&mut self, generation: u64) {
        self.outstanding = self.outstanding.saturating_sub(1);
        if generation == self.generation {
            self.producer = None;
        }
        if self.outstanding > 0 {
            return;
        }

        // Stay active if new paths were published in the meantime. The
        // refresh signal for them is still queued.
        let paths = &self.paths;
        let passive = self.state.send_if_modified(|state| {
            if matches!(paths.has_changed(), Ok(true)) {
                false
            }
            else {
                *state = CacheState::Passive;
                true
            }
        });
        if !passive {
            return;
        }

        info!(
            "Index cache complete with {} entries, generation {}",
            self.entries.len(),
            self.generation
        );
        self.waiting.clear();
        for tx in self.waiting_all.drain(..) {
            for entry in &self.entries {
                let _ = tx.send(entry.clone());
            }
        }
    }

    fn request(&mut self, request: Request<I::Value>) {
        let Request { query, tx } = request;
        let passive = *self.state.borrow() == CacheState::Passive;
        match query {
            Query::Key(key) => {
                if key.is_empty() {
                    return;
                }
                if let Some(&pos) = self.latest.get(&key) {
                    let _ = tx.send(self.entries[pos].clone());
                }
                else if !passive {
                    trace!("Parking request for '{key}'");
                    self.waiting.entry(key).or_default().push(tx);
                }
            }
            Query::All => {
                if passive {
                    for entry in &self.entries {
                        let _ = tx.send(entry.clone());
                    }
                }
                else {
                    self.waiting_all.push(tx);
                }
            }
        }
    }
}

/// Indexes the results of a scan and hands them to the owner.
async fn produce<I: Indexer>(
    generation: u64,
    mut stream: ScanStream,
    indexer: Arc<I>,
    commands: mpsc::UnboundedSender<Command<I::Value>>,
) {
    while let Some(item) = stream.next().await {
        let entries = indexer.index(&item);
        if entries.is_empty() {
            continue;
        }
        let command = Command::Indexed {
            generation,
            entries,
        };
        if commands.send(command).is_err() {
            return;
        }
    }
    let _ = commands.send(Command::Done { generation });
}


//------------ Tests ---------------------------------------------------------
