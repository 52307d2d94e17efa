//! The put/get facade.
//!
//! A put writes the blob, inserts it into the sharded tree of the current
//! head, commits that tree on top of the head and advances the branch with
//! a compare-and-swap. A lost race re-resolves the head and rebuilds; the
//! blob itself is written only once.

use std::io::{self, Read, Write};

use tracing::{debug, warn};

use crate::shelve::config::{ShelveConfig, DEFAULT_MAX_PUT_RETRIES};
use crate::shelve::head::HeadTracker;
use crate::shelve::shard::ShardedTreeBuilder;
use crate::storage::{
    BranchName, CommitId, CommitInfo, CommitMessage, ContentHash, GitObjectStore, IntegrityReport, ObjectStore,
    ShelveResult, SHARD_PREFIX_LEN,
};

/// A content-addressed blob store kept on one branch of an object store.
///
/// Thread-safe: concurrent puts on the same branch, through one shelve or
/// several, each land in the final tree.
#[derive(Debug)]
pub struct ContentShelve<S: ObjectStore> {
    store: S,
    head: HeadTracker,
    max_put_retries: usize,
}

impl ContentShelve<GitObjectStore> {
    /// Open the store and branch named by a configuration.
    pub fn open(config: &ShelveConfig) -> ShelveResult<Self> {
        let store = config.open_store()?;
        Ok(Self::new(store, config.branch_name()?).with_max_put_retries(config.max_put_retries))
    }
}

impl<S: ObjectStore> ContentShelve<S> {
    pub fn new(store: S, branch: BranchName) -> Self {
        Self {
            store,
            head: HeadTracker::new(branch),
            max_put_retries: DEFAULT_MAX_PUT_RETRIES,
        }
    }

    pub fn with_max_put_retries(mut self, retries: usize) -> Self {
        self.max_put_retries = retries;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn branch(&self) -> &BranchName {
        self.head.branch()
    }

    /// Store `data` and return its hash.
    pub fn put(&self, data: &[u8]) -> ShelveResult<ContentHash> {
        let hash = self.store.write_blob(data)?;
        self.shelve(hash)
    }

    /// Store whatever `f` writes into the sink.
    ///
    /// Nothing is shelved if `f` fails.
    pub fn put_with<F>(&self, f: F) -> ShelveResult<ContentHash>
    where
        F: FnOnce(&mut dyn Write) -> io::Result<()>,
    {
        let hash = self.store.write_blob_streaming(f)?;
        self.shelve(hash)
    }

    /// Store everything `reader` yields.
    pub fn put_reader<R: Read + ?Sized>(&self, reader: &mut R) -> ShelveResult<ContentHash> {
        self.put_with(|sink| io::copy(reader, sink).map(|_| ()))
    }

    /// Fails with `ObjectNotFound` if the store does not have `hash`.
    pub fn get(&self, hash: ContentHash) -> ShelveResult<Vec<u8>> {
        self.store.read_blob(hash)
    }

    /// Stream the blob through `f`.
    ///
    /// Loose blobs are streamed in bounded memory. Packed blobs, which
    /// includes everything that arrived by fetch, are inflated in full
    /// before `f` sees them.
    pub fn get_with<T, F>(&self, hash: ContentHash, f: F) -> ShelveResult<T>
    where
        F: FnOnce(&mut dyn Read) -> io::Result<T>,
    {
        self.store.read_blob_streaming(hash, f)
    }

    /// Copy the blob into `writer`, returning the byte count.
    pub fn get_to<W: Write + ?Sized>(&self, hash: ContentHash, writer: &mut W) -> ShelveResult<u64> {
        self.get_with(hash, |source| io::copy(source, writer))
    }

    /// The branch head as the store currently sees it.
    pub fn head(&self) -> ShelveResult<CommitId> {
        self.head.resolve(&self.store)
    }

    /// Whether the tree at head lists `hash`.
    pub fn contains(&self, hash: ContentHash) -> ShelveResult<bool> {
        let root = self.store.read_commit(self.head()?)?.tree_id;
        let path = format!("{}/{}", hash.prefix(), hash.suffix());
        let entries = self.store.list_tree(root, Some(path.as_str()))?;
        Ok(entries.iter().any(|entry| entry.as_blob() == Some(hash)))
    }

    /// Every hash in the tree at head, in shard order.
    pub fn list(&self) -> ShelveResult<Vec<ContentHash>> {
        let root = self.store.read_commit(self.head()?)?.tree_id;
        let mut hashes = Vec::new();
        for entry in self.store.list_tree(root, None)? {
            let shard = match entry.as_tree() {
                Some(id) if is_shard_name(&entry.name) => id,
                _ => continue,
            };
            for item in self.store.list_tree(shard, None)? {
                if item.as_blob().is_some() {
                    hashes.push(ContentHash::from_parts(&entry.name, &item.name)?);
                }
            }
        }
        Ok(hashes)
    }

    /// Commits on the branch, newest first.
    pub fn history(&self, limit: Option<usize>) -> ShelveResult<Vec<CommitInfo>> {
        self.store.history(self.head()?, limit)
    }

    /// Run the store's integrity check.
    pub fn verify(&self) -> ShelveResult<IntegrityReport> {
        self.store.check_integrity()
    }

    fn shelve(&self, hash: ContentHash) -> ShelveResult<ContentHash> {
        let mut attempt = 0;
        loop {
            match self.try_shelve(hash) {
                Ok(commit) => {
                    debug!(hash = %hash.short(), commit = %commit.short(), attempt, "shelved");
                    return Ok(hash);
                }
                Err(e) if e.is_retriable() && attempt < self.max_put_retries => {
                    attempt += 1;
                    warn!(
                        hash = %hash.short(),
                        branch = %self.branch(),
                        attempt,
                        max = self.max_put_retries,
                        "branch moved during put, retrying"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn try_shelve(&self, hash: ContentHash) -> ShelveResult<CommitId> {
        let head = self.head.current(&self.store)?;
        let root = self.store.read_commit(head)?.tree_id;
        let new_root = ShardedTreeBuilder::new(&self.store).insert(hash, Some(root))?;
        let commit = self
            .store
            .make_commit(new_root, Some(head), &CommitMessage::added(&hash))?;
        self.head.advance(&self.store, Some(head), commit)?;
        Ok(commit)
    }
}

fn is_shard_name(name: &str) -> bool {
    name.len() == SHARD_PREFIX_LEN && name.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ShelveError;
    use proptest::prelude::*;
    use std::sync::{mpsc, Arc};
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    fn setup() -> (TempDir, ContentShelve<GitObjectStore>) {
        let dir = TempDir::new().unwrap();
        let shelve = ContentShelve::open(&ShelveConfig::new(dir.path())).unwrap();
        (dir, shelve)
    }

    #[test]
    fn test_put_get() {
        let (_dir, shelve) = setup();
        let hash = shelve.put(b"some data").unwrap();
        assert_eq!(shelve.get(hash).unwrap(), b"some data");
        assert!(shelve.contains(hash).unwrap());
    }

    #[test]
    fn test_put_is_idempotent() {
        let (_dir, shelve) = setup();

        let first = shelve.put(b"twice").unwrap();
        let head_after_first = shelve.head().unwrap();
        let second = shelve.put(b"twice").unwrap();

        assert_eq!(first, second);
        assert_eq!(shelve.list().unwrap(), vec![first]);

        // the second put still commits once, with an identical tree
        let head = shelve.store().read_commit(shelve.head().unwrap()).unwrap();
        assert_eq!(head.first_parent(), Some(head_after_first));
        let previous = shelve.store().read_commit(head_after_first).unwrap();
        assert_eq!(head.tree_id, previous.tree_id);
    }

    #[test]
    fn test_each_put_advances_once() {
        let (_dir, shelve) = setup();
        shelve.put(b"a").unwrap();
        shelve.put(b"b").unwrap();
        shelve.put(b"c").unwrap();

        // three puts plus the bootstrap commit
        let history = shelve.history(None).unwrap();
        assert_eq!(history.len(), 4);
        assert!(history[0].message.starts_with("[shelve] Added"));
        assert!(history[3].parent_ids.is_empty());
    }

    #[test]
    fn test_streaming_put_in_chunks() {
        let (_dir, shelve) = setup();
        let hash = shelve
            .put_with(|w| {
                w.write_all(b"i can ")?;
                w.write_all(b"stream my data ")?;
                w.write_all(b"in chunks!")
            })
            .unwrap();

        assert_eq!(shelve.get(hash).unwrap(), b"i can stream my data in chunks!");
        assert_eq!(hash, shelve.store().write_blob(b"i can stream my data in chunks!").unwrap());
    }

    #[test]
    fn test_large_payload_read_in_small_increments() {
        let (_dir, shelve) = setup();
        let payload: Vec<u8> = (0..30_000u32).map(|i| (i % 251) as u8).collect();

        let mut source = payload.as_slice();
        let hash = shelve.put_reader(&mut source).unwrap();

        let read_back = shelve
            .get_with(hash, |r| {
                let mut out = Vec::new();
                let mut buf = [0u8; 200];
                loop {
                    let n = r.read(&mut buf)?;
                    if n == 0 {
                        break;
                    }
                    out.extend_from_slice(&buf[..n]);
                }
                Ok(out)
            })
            .unwrap();
        assert_eq!(read_back, payload);

        let mut sink = Vec::new();
        assert_eq!(shelve.get_to(hash, &mut sink).unwrap(), 30_000);
        assert_eq!(sink, payload);
    }

    #[test]
    fn test_failed_stream_shelves_nothing() {
        let (_dir, shelve) = setup();
        let head = shelve.head().unwrap();

        let result = shelve.put_with(|w| {
            w.write_all(b"half")?;
            Err(io::Error::new(io::ErrorKind::Other, "producer died"))
        });

        assert!(matches!(result, Err(ShelveError::Io(_))));
        assert_eq!(shelve.head().unwrap(), head);
        assert!(shelve.list().unwrap().is_empty());
    }

    #[test]
    fn test_get_unknown_hash() {
        let (_dir, shelve) = setup();
        let missing = ContentHash::from_hex("e30b41f7fbe195d45e702f3cafd0f48ab8d62a50").unwrap();

        assert!(matches!(shelve.get(missing), Err(ShelveError::ObjectNotFound(_))));
        let mut called = false;
        let result = shelve.get_with(missing, |_| {
            called = true;
            Ok(())
        });
        assert!(matches!(result, Err(ShelveError::ObjectNotFound(_))));
        assert!(!called);
        assert!(!shelve.contains(missing).unwrap());
    }

    #[test]
    fn test_first_head_is_bootstrap() {
        let (_dir, shelve) = setup();
        let head = shelve.head().unwrap();
        let info = shelve.store().read_commit(head).unwrap();
        assert!(info.parent_ids.is_empty());
        assert!(shelve.list().unwrap().is_empty());
    }

    #[test]
    fn test_put_with_reads_the_same_shelve() {
        let (_dir, shelve) = setup();
        let base = shelve.put(b"base").unwrap();

        let hash = shelve
            .put_with(|w| {
                let data = shelve.get(base).map_err(io::Error::other)?;
                w.write_all(&data)?;
                w.write_all(b" and more")
            })
            .unwrap();

        let copied = shelve
            .get_with(hash, |r| {
                let mut data = Vec::new();
                r.read_to_end(&mut data)?;
                assert!(shelve.contains(base).map_err(io::Error::other)?);
                Ok(data)
            })
            .unwrap();
        assert_eq!(copied, b"base and more");
    }

    #[test]
    fn test_get_during_slow_streaming_put() {
        let (_dir, shelve) = setup();
        let shelve = Arc::new(shelve);
        let base = shelve.put(b"already here").unwrap();

        let (started_tx, started_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let writer = {
            let shelve = Arc::clone(&shelve);
            thread::spawn(move || {
                shelve.put_with(|w| {
                    w.write_all(b"slow ")?;
                    started_tx.send(()).map_err(io::Error::other)?;
                    done_rx
                        .recv_timeout(Duration::from_secs(10))
                        .map_err(io::Error::other)?;
                    w.write_all(b"producer")
                })
            })
        };

        started_rx.recv().unwrap();
        // the producer is still writing; other callers are not held up
        assert_eq!(shelve.get(base).unwrap(), b"already here");
        shelve.put(b"meanwhile").unwrap();
        done_tx.send(()).unwrap();

        let hash = writer.join().unwrap().unwrap();
        assert_eq!(shelve.get(hash).unwrap(), b"slow producer");
        assert_eq!(shelve.list().unwrap().len(), 3);
    }

    #[test]
    fn test_concurrent_puts_through_one_shelve() {
        let (_dir, shelve) = setup();
        let shelve = Arc::new(shelve);

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let shelve = shelve.clone();
                std::thread::spawn(move || {
                    (0..5)
                        .map(|i| shelve.put(format!("thread {} item {}", t, i).as_bytes()).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.join().unwrap());
        }

        let listed = shelve.list().unwrap();
        assert_eq!(listed.len(), 20);
        for hash in all {
            assert!(shelve.contains(hash).unwrap());
        }
    }

    #[test]
    fn test_concurrent_puts_through_separate_handles() {
        let dir = TempDir::new().unwrap();
        let config = ShelveConfig::new(dir.path()).max_put_retries(64);
        // create the branch up front so both writers race on advance only
        ContentShelve::open(&config).unwrap().head().unwrap();

        let handles: Vec<_> = (0..2)
            .map(|t| {
                let config = config.clone();
                std::thread::spawn(move || {
                    let shelve = ContentShelve::open(&config).unwrap();
                    (0..10)
                        .map(|i| shelve.put(format!("writer {} item {}", t, i).as_bytes()).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.join().unwrap());
        }

        let shelve = ContentShelve::open(&config).unwrap();
        for hash in &all {
            assert!(shelve.contains(*hash).unwrap(), "lost write {}", hash);
        }
        assert_eq!(shelve.list().unwrap().len(), 20);
    }

    #[test]
    fn test_stale_cache_recovers() {
        let dir = TempDir::new().unwrap();
        let config = ShelveConfig::new(dir.path());
        let a = ContentShelve::open(&config).unwrap();
        let b = ContentShelve::open(&config).unwrap();

        let first = a.put(b"from a").unwrap();
        // b moves the branch behind a's cached head
        let second = b.put(b"from b").unwrap();
        let third = a.put(b"from a again").unwrap();

        let mut expected = vec![first, second, third];
        expected.sort();
        let mut listed = a.list().unwrap();
        listed.sort();
        assert_eq!(listed, expected);
    }

    #[test]
    fn test_zero_retries_surfaces_conflict() {
        let dir = TempDir::new().unwrap();
        let config = ShelveConfig::new(dir.path()).max_put_retries(0);
        let a = ContentShelve::open(&config).unwrap();
        let b = ContentShelve::open(&config).unwrap();

        a.put(b"one").unwrap();
        b.put(b"two").unwrap();

        let before = a.head().unwrap();
        let result = a.put(b"three");
        assert!(matches!(result, Err(ShelveError::RefConflict { .. })));
        assert_eq!(a.head().unwrap(), before);

        // the cache was dropped, so a plain retry succeeds
        a.put(b"three").unwrap();
    }

    #[test]
    fn test_history_limit() {
        let (_dir, shelve) = setup();
        for i in 0..5 {
            shelve.put(format!("entry {}", i).as_bytes()).unwrap();
        }
        let recent = shelve.history(Some(2)).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, shelve.head().unwrap());
    }

    #[test]
    fn test_verify_after_puts() {
        let (_dir, shelve) = setup();
        for i in 0..10 {
            shelve.put(format!("payload {}", i).as_bytes()).unwrap();
        }
        let report = shelve.verify().unwrap();
        assert!(report.is_clean(), "{:?}", report);
    }

    #[test]
    fn test_custom_branch() {
        let dir = TempDir::new().unwrap();
        let shelve = ContentShelve::open(&ShelveConfig::new(dir.path()).branch("blobs")).unwrap();
        shelve.put(b"x").unwrap();
        assert!(shelve.store().resolve_ref("refs/heads/blobs").is_ok());
        assert!(shelve.store().resolve_ref("refs/heads/shelve").is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_put_get_roundtrip(data in proptest::collection::vec(any::<u8>(), 0..4096)) {
            let (_dir, shelve) = setup();
            let hash = shelve.put(&data).unwrap();
            prop_assert_eq!(shelve.get(hash).unwrap(), data.clone());

            let mut source = data.as_slice();
            prop_assert_eq!(shelve.put_reader(&mut source).unwrap(), hash);
            prop_assert_eq!(shelve.list().unwrap(), vec![hash]);
        }
    }
}
