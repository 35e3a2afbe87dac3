//! Parallel search over the virtual tree.
//!
//! One thread walks the tree breadth-first, resolving folders and file names
//! as it goes, and feeds every discovered node to a pool of workers that
//! evaluate the compiled query. The calling thread reports progress until the
//! walk and all queued evaluations are done.

use std::borrow::Cow;
use std::cell::OnceCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{RecvTimeoutError, Sender};
use parking_lot::Mutex;
use sqpack_common::CancellationToken;
use sqpack_vfs::{FileId, FileInfo, FileLookup, FolderId, VirtualTree};
use tracing::{debug, warn};

use crate::matcher::Subject;
use crate::parser::Query;
use crate::pattern::Deadline;
use crate::{Error, Result};

/// Progress reports are never sent more often than this.
pub const MIN_PROGRESS_INTERVAL: Duration = Duration::from_millis(200);

/// Search tuning.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Number of evaluation workers
    pub threads: usize,
    /// Time budget for evaluating one item
    pub item_timeout: Duration,
    /// Interval between progress reports, at least [`MIN_PROGRESS_INTERVAL`]
    pub progress_interval: Duration,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            threads: thread::available_parallelism().map_or(4, |n| n.get()),
            item_timeout: Duration::from_secs(5),
            progress_interval: MIN_PROGRESS_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchState {
    Idle,
    /// The tree walk is still discovering items.
    Traversing,
    /// Every item is queued; workers are finishing.
    Draining,
    Completed,
}

/// Snapshot of a running search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchProgress {
    pub state: SearchState,
    /// Items discovered so far. Grows while the walk runs.
    pub total: usize,
    pub processed: usize,
    /// Path of the item evaluated most recently
    pub last_item: Option<String>,
    pub elapsed: Duration,
}

impl SearchProgress {
    pub fn completed(&self) -> bool {
        self.state == SearchState::Completed
    }
}

/// Receives matches and progress. Found callbacks run on worker threads.
pub trait SearchObserver: Sync {
    fn folder_found(&self, _tree: &VirtualTree, _id: FolderId) {}

    /// Called with the file's name already resolved.
    fn file_found(&self, _tree: &VirtualTree, _id: FileId) {}

    fn progress(&self, _progress: &SearchProgress) {}
}

impl SearchObserver for () {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Work {
    Folder(FolderId),
    File(FileId),
}

impl Work {
    fn path(self, tree: &VirtualTree) -> Option<String> {
        match self {
            Work::Folder(id) => tree.folder_path(id).ok(),
            Work::File(id) => tree.file_path(id).ok(),
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    total: AtomicUsize,
    processed: AtomicUsize,
    traversed: AtomicBool,
    last_item: Mutex<Option<Work>>,
}

impl Shared {
    fn snapshot(&self, tree: &VirtualTree, state: SearchState, started: Instant) -> SearchProgress {
        let last = *self.last_item.lock();
        SearchProgress {
            state,
            total: self.total.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            last_item: last.and_then(|work| work.path(tree)),
            elapsed: started.elapsed(),
        }
    }
}

/// Runs queries over a tree.
#[derive(Debug, Clone)]
pub struct Searcher<'a> {
    tree: &'a VirtualTree,
    options: SearchOptions,
}

impl<'a> Searcher<'a> {
    pub fn new(tree: &'a VirtualTree, options: SearchOptions) -> Self {
        Self { tree, options }
    }

    pub fn options(&self) -> &SearchOptions {
        &self.options
    }

    /// Parse `query` and search everything below `root`.
    ///
    /// A malformed query fails before any traversal starts.
    pub fn run(
        &self,
        root: FolderId,
        query: &str,
        observer: &dyn SearchObserver,
        cancel: &CancellationToken,
    ) -> Result<SearchProgress> {
        let query = Query::parse(query)?;
        self.run_query(root, &query, observer, cancel)
    }

    /// Search everything below `root` with a compiled query.
    ///
    /// Returns the final progress snapshot, or [`Error::Cancelled`].
    pub fn run_query(
        &self,
        root: FolderId,
        query: &Query,
        observer: &dyn SearchObserver,
        cancel: &CancellationToken,
    ) -> Result<SearchProgress> {
        let started = Instant::now();
        let shared = Shared::default();
        let threads = self.options.threads.max(1);
        let interval = self.options.progress_interval.max(MIN_PROGRESS_INTERVAL);
        debug!(query = query.text(), threads, "search started");

        observer.progress(&shared.snapshot(self.tree, SearchState::Idle, started));

        let walked = thread::scope(|scope| {
            let (work_tx, work_rx) = crossbeam_channel::unbounded::<Work>();
            // Never carries a message; disconnects once every thread is done.
            let (alive_tx, alive_rx) = crossbeam_channel::bounded::<()>(0);

            for _ in 0..threads {
                let work_rx = work_rx.clone();
                let alive_tx = alive_tx.clone();
                let shared = &shared;
                scope.spawn(move || {
                    let _alive = alive_tx;
                    for work in work_rx.iter() {
                        if !cancel.is_cancelled() {
                            self.evaluate(work, query, observer, cancel);
                            *shared.last_item.lock() = Some(work);
                        }
                        shared.processed.fetch_add(1, Ordering::Relaxed);
                    }
                });
            }
            drop(work_rx);

            let walker = {
                let alive_tx = alive_tx.clone();
                let shared = &shared;
                scope.spawn(move || {
                    let _alive = alive_tx;
                    let walked = self.traverse(root, &work_tx, shared, cancel);
                    shared.traversed.store(true, Ordering::Release);
                    walked
                })
            };
            drop(alive_tx);

            loop {
                match alive_rx.recv_timeout(interval) {
                    Ok(()) => {}
                    Err(RecvTimeoutError::Timeout) => {
                        let state = if shared.traversed.load(Ordering::Acquire) {
                            SearchState::Draining
                        } else {
                            SearchState::Traversing
                        };
                        observer.progress(&shared.snapshot(self.tree, state, started));
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }

            walker.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic))
        });

        walked?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let done = shared.snapshot(self.tree, SearchState::Completed, started);
        debug!(total = done.total, elapsed = ?done.elapsed, "search completed");
        observer.progress(&done);
        Ok(done)
    }

    /// Walk breadth-first below `root`, queueing every folder and file.
    fn traverse(&self, root: FolderId, queue: &Sender<Work>, shared: &Shared, cancel: &CancellationToken) -> Result<()> {
        let mut pending = VecDeque::from([root]);
        while let Some(folder) = pending.pop_front() {
            cancel.check()?;

            let (folders, files) = match self.expand(folder, cancel) {
                Ok(children) => children,
                Err(e) if e.is_cancelled() => return Err(Error::Cancelled),
                Err(e) => {
                    let path = self.tree.folder_path(folder).unwrap_or_default();
                    warn!(folder = %path, error = %e, "skipping folder that failed to resolve");
                    continue;
                }
            };

            shared.total.fetch_add(folders.len() + files.len(), Ordering::Relaxed);
            let items = folders
                .iter()
                .map(|&id| Work::Folder(id))
                .chain(files.into_iter().map(Work::File));
            for work in items {
                if queue.send(work).is_err() {
                    return Ok(());
                }
            }
            pending.extend(folders);
        }
        Ok(())
    }

    fn expand(&self, folder: FolderId, cancel: &CancellationToken) -> sqpack_vfs::Result<(Vec<FolderId>, Vec<FileId>)> {
        self.tree.resolve_file_names(folder, cancel)?;
        Ok((self.tree.get_folders(folder)?, self.tree.get_files(folder)?))
    }

    fn evaluate(&self, work: Work, query: &Query, observer: &dyn SearchObserver, cancel: &CancellationToken) {
        let subject = TreeSubject::new(self.tree, work, cancel);
        let deadline = Deadline::new(self.options.item_timeout);
        if !query.matches(&subject, &deadline) {
            return;
        }
        match work {
            Work::Folder(id) => observer.folder_found(self.tree, id),
            Work::File(id) => {
                if let Err(e) = self.tree.file_name(id) {
                    warn!(file = id.index(), error = %e, "matched file has no readable name");
                    return;
                }
                observer.file_found(self.tree, id);
            }
        }
    }
}

/// A tree node seen through [`Subject`], opening file contents on demand.
struct TreeSubject<'t> {
    tree: &'t VirtualTree,
    work: Work,
    cancel: &'t CancellationToken,
    lookup: OnceCell<Option<FileLookup>>,
    data: OnceCell<Option<Vec<u8>>>,
}

impl<'t> TreeSubject<'t> {
    fn new(tree: &'t VirtualTree, work: Work, cancel: &'t CancellationToken) -> Self {
        Self {
            tree,
            work,
            cancel,
            lookup: OnceCell::new(),
            data: OnceCell::new(),
        }
    }

    fn lookup(&self) -> Option<&FileLookup> {
        let Work::File(id) = self.work else {
            return None;
        };
        self.lookup
            .get_or_init(|| match self.tree.lookup(id) {
                Ok(lookup) => Some(lookup),
                Err(e) => {
                    warn!(file = id.index(), error = %e, "cannot open file during search");
                    None
                }
            })
            .as_ref()
    }
}

impl Subject for TreeSubject<'_> {
    fn is_folder(&self) -> bool {
        matches!(self.work, Work::Folder(_))
    }

    fn name(&self) -> Option<Cow<'_, str>> {
        match self.work {
            Work::Folder(id) => {
                let name = self.tree.folder_name(id).ok()?;
                Some(Cow::Owned(name.trim_end_matches('/').to_string()))
            }
            Work::File(id) => self.tree.file_name(id).ok().map(|name| Cow::Owned(name.to_string())),
        }
    }

    fn path(&self) -> Option<Cow<'_, str>> {
        let path = self.work.path(self.tree)?;
        Some(Cow::Owned(path.trim_end_matches('/').to_string()))
    }

    fn hashes(&self) -> Vec<u32> {
        match self.work {
            Work::Folder(id) => self.tree.folder_hash(id).into_iter().collect(),
            Work::File(id) => {
                let mut hashes = Vec::with_capacity(2);
                if let Ok(file) = self.tree.file(id) {
                    hashes.push(file.name_hash);
                }
                if let Ok(Some(full)) = self.tree.file_full_path_hash(id) {
                    hashes.push(full);
                }
                hashes
            }
        }
    }

    fn info(&self) -> Option<FileInfo> {
        self.lookup().map(FileLookup::info)
    }

    fn data(&self) -> Option<&[u8]> {
        self.data
            .get_or_init(|| {
                let lookup = self.lookup()?;
                match lookup.read_all(self.cancel) {
                    Ok(data) => Some(data),
                    Err(e) if e.is_cancelled() => None,
                    Err(e) => {
                        warn!(file = lookup.name(), error = %e, "cannot read file during search");
                        None
                    }
                }
            })
            .as_deref()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sqpack_archive::testing::{Fixture, FixtureBuilder};
    use sqpack_common::hash::{file_name_hash, full_path_hash};
    use sqpack_vfs::{PathListNameService, TreeOptions};

    use super::*;

    const NAMED: [&str; 5] = [
        "chara/equipment/e0001/texture/body.tex",
        "chara/equipment/e0001/vfx/fire.atex",
        "chara/equipment/e0001/e0001.imc",
        "exd/big.bin",
        "exd/small.bin",
    ];

    fn sample_tree() -> (Fixture, VirtualTree) {
        let header = vec![0u8; 80];
        let fixture = FixtureBuilder::new()
            .texture(0x04, 0, 0, NAMED[0], &header, &[vec![1u8; 256]])
            .texture(0x04, 0, 0, NAMED[1], &header, &[vec![2u8; 128]])
            .standard(0x04, 0, 0, NAMED[2], b"imc data")
            .standard(0x0A, 0, 0, NAMED[3], &vec![0x41; 1 << 20])
            .standard(0x0A, 0, 0, NAMED[4], b"needle in a haystack")
            .standard(0x04, 0, 1, "chara/secret/hidden.bin", b"unnamed")
            .build()
            .unwrap();
        let names = PathListNameService::from_paths(NAMED);
        let tree = VirtualTree::open(fixture.sqpack_dir(), Arc::new(names), &TreeOptions::default()).unwrap();
        (fixture, tree)
    }

    #[derive(Default)]
    struct Collector {
        folders: Mutex<Vec<String>>,
        files: Mutex<Vec<String>>,
        reports: Mutex<Vec<SearchProgress>>,
    }

    impl Collector {
        fn files(&self) -> Vec<String> {
            let mut files = self.files.lock().clone();
            files.sort();
            files
        }
    }

    impl SearchObserver for Collector {
        fn folder_found(&self, tree: &VirtualTree, id: FolderId) {
            self.folders.lock().push(tree.folder_path(id).unwrap());
        }

        fn file_found(&self, tree: &VirtualTree, id: FileId) {
            assert!(tree.is_file_name_resolved(id).unwrap());
            self.files.lock().push(tree.file_path(id).unwrap());
        }

        fn progress(&self, progress: &SearchProgress) {
            self.reports.lock().push(progress.clone());
        }
    }

    fn search(tree: &VirtualTree, query: &str, options: SearchOptions) -> (Collector, SearchProgress) {
        let collector = Collector::default();
        let done = Searcher::new(tree, options)
            .run(tree.root(), query, &collector, &CancellationToken::new())
            .unwrap();
        (collector, done)
    }

    fn files(tree: &VirtualTree, query: &str) -> Vec<String> {
        search(tree, query, SearchOptions::default()).0.files()
    }

    #[test]
    fn test_type_and_name_query() {
        let (_fixture, tree) = sample_tree();
        assert_eq!(
            files(&tree, "type:texture AND NOT name:*.atex"),
            vec!["chara/equipment/e0001/texture/body.tex".to_string()]
        );
        assert_eq!(
            files(&tree, "(name:*.tex OR name:*.atex) AND path:vfx"),
            vec!["chara/equipment/e0001/vfx/fire.atex".to_string()]
        );
    }

    #[test]
    fn test_size_hash_and_data_queries() {
        let (_fixture, tree) = sample_tree();
        assert_eq!(files(&tree, "size:>=1m"), vec!["exd/big.bin".to_string()]);

        let name = format!("hash:{:08x}", file_name_hash("e0001.imc"));
        assert_eq!(files(&tree, &name), vec![NAMED[2].to_string()]);
        let full = format!("hash:{:x}", full_path_hash("exd/small.bin"));
        assert_eq!(files(&tree, &full), vec!["exd/small.bin".to_string()]);

        assert_eq!(files(&tree, "data:needle"), vec!["exd/small.bin".to_string()]);
        assert_eq!(files(&tree, "data:unnamed").len(), 1);
    }

    #[test]
    fn test_folders_and_progress() {
        let (_fixture, tree) = sample_tree();
        let (collector, done) = search(&tree, "type:folder name:=vfx", SearchOptions::default());
        assert_eq!(*collector.folders.lock(), vec!["chara/equipment/e0001/vfx/".to_string()]);
        assert!(collector.files().is_empty());

        assert!(done.completed());
        assert_eq!(done.total, done.processed);
        let reports = collector.reports.lock();
        assert_eq!(reports.first().map(|p| p.state), Some(SearchState::Idle));
        assert_eq!(reports.last(), Some(&done));
    }

    #[test]
    fn test_zero_timeout_still_completes() {
        let (_fixture, tree) = sample_tree();
        let options = SearchOptions {
            threads: 2,
            item_timeout: Duration::ZERO,
            ..SearchOptions::default()
        };
        let (collector, done) = search(&tree, "data:*A*B", options);
        assert!(collector.files().is_empty());
        // No file was opened for its contents.
        assert!(tree.cache().is_empty());
        assert!(done.completed());
        assert_eq!(done.total, done.processed);
        assert!(done.total > NAMED.len());
    }

    #[test]
    fn test_parse_error_aborts() {
        let (_fixture, tree) = sample_tree();
        let result = Searcher::new(&tree, SearchOptions::default()).run(
            tree.root(),
            "(name:a",
            &(),
            &CancellationToken::new(),
        );
        assert!(matches!(result, Err(Error::Parse { .. })));
    }

    #[test]
    fn test_cancelled_search() {
        let (_fixture, tree) = sample_tree();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let collector = Collector::default();
        let result = Searcher::new(&tree, SearchOptions::default()).run(tree.root(), "e0001", &collector, &cancel);
        assert!(result.unwrap_err().is_cancelled());
        assert!(collector.files().is_empty());
    }
}
