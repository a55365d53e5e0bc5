//! # Board Store
//!
//! Owns the board-wide post counter and the thread index, and turns draft
//! posts into persisted thread documents.
//!
//! Storage layout:
//! - `<board id>:no` holds the number of post numbers handed out so far
//! - `<post no>` holds a thread document (JSON) keyed by its opening post
//! - the sorted set `<board id>` holds thread numbers scored by bump time

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::clock::MonotonicStamp;
use crate::error::{AppError, Result};
use crate::models::{Post, Thread};
use crate::traits::{KeyValueStore, OrderedStore, Store};

const THREAD_LOCK_STRIPES: usize = 64;

/// Whether a reply moves its thread to the top of the listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BumpPolicy {
    Always,
    /// Bump unless the reply was posted with `sage`.
    #[default]
    UnlessSage,
    Never,
}

impl BumpPolicy {
    pub fn bumps(&self, reply: &Post) -> bool {
        match self {
            BumpPolicy::Always => true,
            BumpPolicy::UnlessSage => !reply.is_sage(),
            BumpPolicy::Never => false,
        }
    }
}

impl FromStr for BumpPolicy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "always" => Ok(BumpPolicy::Always),
            "unless-sage" => Ok(BumpPolicy::UnlessSage),
            "never" => Ok(BumpPolicy::Never),
            other => Err(AppError::validation(format!("unknown bump policy '{other}'"))),
        }
    }
}

pub struct BoardStore {
    id: String,
    docs: Arc<dyn KeyValueStore>,
    counter: Arc<dyn KeyValueStore>,
    index: Arc<dyn OrderedStore>,
    bump: BumpPolicy,
    /// Serializes replies to the same thread within this process.
    thread_locks: Vec<Mutex<()>>,
    /// Index scores, strictly increasing so equal timestamps never tie.
    scores: MonotonicStamp,
}

impl BoardStore {
    /// Opens a board whose counter, documents and index all live in `store`.
    pub async fn open<S>(id: impl Into<String>, store: Arc<S>, bump: BumpPolicy) -> Result<Self>
    where
        S: Store + 'static,
    {
        Self::with_parts(id, store.clone(), store.clone(), store, bump).await
    }

    /// Opens a board with separately supplied stores, seeding the counter
    /// with `"0"` if it does not exist yet.
    pub async fn with_parts(
        id: impl Into<String>,
        docs: Arc<dyn KeyValueStore>,
        counter: Arc<dyn KeyValueStore>,
        index: Arc<dyn OrderedStore>,
        bump: BumpPolicy,
    ) -> Result<Self> {
        let board = Self {
            id: id.into(),
            docs,
            counter,
            index,
            bump,
            thread_locks: (0..THREAD_LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            scores: MonotonicStamp::new(),
        };
        board.seed_counter().await?;
        Ok(board)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn counter_key(&self) -> String {
        format!("{}:no", self.id)
    }

    /// Another process may be seeding or counting at the same time, so the
    /// seed must never overwrite a value that is already there.
    async fn seed_counter(&self) -> Result<()> {
        if self.counter.set_if_absent(&self.counter_key(), "0").await? {
            debug!(board = %self.id, "seeded post counter");
        }
        Ok(())
    }

    /// How many post numbers have been handed out, burned ones included.
    pub async fn post_count(&self) -> Result<u64> {
        let raw = self.counter.get(&self.counter_key()).await?;
        raw.parse()
            .map_err(|_| AppError::storage(format!("post counter holds '{raw}'")))
    }

    async fn next_post_no(&self) -> Result<u64> {
        let count = self.counter.increment(&self.counter_key()).await?;
        u64::try_from(count - 1)
            .map_err(|_| AppError::storage(format!("post counter returned {count}")))
    }

    fn thread_lock(&self, key: &str) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.thread_locks[hasher.finish() as usize % self.thread_locks.len()]
    }

    async fn persist(&self, thread: &Thread) -> Result<()> {
        let result = match thread.to_json() {
            Ok(doc) => self.docs.set(&thread.key(), &doc).await,
            Err(err) => Err(err),
        };
        if let Err(err) = &result {
            // Numbers are never handed out twice, so this one is gone for good.
            warn!(board = %self.id, thread = thread.no(), "thread not persisted, post number burned: {err}");
        }
        result
    }

    /// Moves `thread` to `timestamp` in the listing. Runs after the document
    /// is stored, so a failure leaves the write in place with a stale listing.
    async fn index_thread(&self, thread: &Thread, timestamp: &DateTime<Utc>) -> Result<()> {
        let score = self.next_score(timestamp);
        let result = self.index.set_ordered(&self.id, &thread.key(), score).await;
        if let Err(err) = &result {
            warn!(board = %self.id, thread = thread.no(), "thread stored but not re-indexed: {err}");
        }
        result
    }

    /// Microseconds since the epoch, which a Redis double score still
    /// represents exactly, bumped past the previous score when needed.
    fn next_score(&self, timestamp: &DateTime<Utc>) -> i64 {
        self.scores.next(timestamp.timestamp_micros())
    }

    /// Creates a thread and returns the number assigned to its opening post.
    pub async fn add_thread(&self, draft: Thread) -> Result<u64> {
        let no = self.next_post_no().await?;

        // Cross references are dropped: there is no thread to apply them to yet.
        let (post, _) = draft.post.finalize(no, Utc::now());
        let thread = Thread::new(post, &draft.subject);

        self.persist(&thread).await?;
        self.index_thread(&thread, &thread.post.timestamp).await?;

        info!(board = %self.id, no, "thread created");
        Ok(no)
    }

    /// Appends a reply to the thread stored under `thread_key` and returns
    /// the reply's number. Backlinks for every `>>N` line of the reply are
    /// recorded on the quoted posts of that thread.
    pub async fn add_post(&self, thread_key: &str, draft: Post) -> Result<u64> {
        let _guard = self.thread_lock(thread_key).lock().await;

        // Look up first so a missing thread never consumes a number.
        let thread = self.get_thread(thread_key).await?;
        let no = self.next_post_no().await?;

        let (reply, transforms) = draft.finalize(no, Utc::now());
        let bumped_at = self.bump.bumps(&reply).then_some(reply.timestamp);

        let thread = transforms
            .iter()
            .fold(thread.with_reply(reply), |thread, transform| thread.apply(transform));

        self.persist(&thread).await?;
        if let Some(timestamp) = bumped_at {
            self.index_thread(&thread, &timestamp).await?;
        }

        info!(board = %self.id, thread = thread.no(), no, backlinks = transforms.len(), "reply added");
        Ok(no)
    }

    /// Fetches a thread document. Absent and unreadable documents are both
    /// reported as not found.
    pub async fn get_thread(&self, key: &str) -> Result<Thread> {
        let doc = self.docs.get(key).await.map_err(|err| {
            if err.is_not_found() {
                AppError::NotFound("thread".to_string(), key.to_string())
            } else {
                err
            }
        })?;

        Thread::from_json(&doc).map_err(|err| {
            warn!(board = %self.id, key, "unreadable thread document: {err}");
            AppError::NotFound("thread".to_string(), key.to_string())
        })
    }

    /// All threads indexed under `board_id`, most recently bumped first.
    /// Fails as a whole if any indexed thread cannot be read.
    pub async fn get_all_threads(&self, board_id: &str) -> Result<Vec<Thread>> {
        let keys = self.index.get_all_ordered_by_score(board_id).await?;

        let mut threads = Vec::with_capacity(keys.len());
        for key in keys {
            let doc = self.docs.get(&key).await.map_err(|err| {
                AppError::storage(format!("indexed thread {key} unreadable: {err}"))
            })?;
            threads.push(Thread::from_json(&doc)?);
        }
        Ok(threads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::models::Format;
    use crate::traits::{MockKeyValueStore, MockOrderedStore};
    use std::collections::HashSet;

    const BOARD: &str = "/obj/";

    fn draft_thread(comment: &str) -> Thread {
        Thread::new(
            Post::new("", "", comment).with_image("/images/0.png", "file.png"),
            "A subject",
        )
    }

    async fn board() -> (BoardStore, Arc<MemoryStore>) {
        let db = Arc::new(MemoryStore::new());
        let board = BoardStore::open(BOARD, db.clone(), BumpPolicy::UnlessSage)
            .await
            .unwrap();
        (board, db)
    }

    async fn listing(board: &BoardStore) -> Vec<u64> {
        board
            .get_all_threads(BOARD)
            .await
            .unwrap()
            .iter()
            .map(Thread::no)
            .collect()
    }

    #[tokio::test]
    async fn open_seeds_counter() {
        let (board, db) = board().await;
        assert_eq!(db.get("/obj/:no").await.unwrap(), "0");
        assert_eq!(board.post_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn open_keeps_existing_counter() {
        let db = Arc::new(MemoryStore::new());
        db.set("/obj/:no", "12").await.unwrap();
        let board = BoardStore::open(BOARD, db, BumpPolicy::default()).await.unwrap();
        assert_eq!(board.add_thread(draft_thread("hi")).await.unwrap(), 12);
    }

    #[tokio::test]
    async fn numbers_start_at_zero_and_increase() {
        let (board, _) = board().await;
        let first = board.add_thread(draft_thread("one")).await.unwrap();
        let reply = board.add_post("0", Post::new("", "", "two")).await.unwrap();
        let second = board.add_thread(draft_thread("three")).await.unwrap();

        assert_eq!((first, reply, second), (0, 1, 2));
        assert_eq!(board.post_count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn stored_thread_matches_draft() {
        let (board, _) = board().await;
        let draft = draft_thread("Hello World!");
        let no = board.add_thread(draft.clone()).await.unwrap();

        let stored = board.get_thread(&no.to_string()).await.unwrap();
        assert_eq!(stored.subject, draft.subject);
        assert_eq!(stored.post.comment, draft.post.comment);
        assert_eq!(stored.post.image, draft.post.image);
        assert_eq!(stored.post.filename, draft.post.filename);
        assert_eq!(stored.post.name, "Anonymous");
        assert!(stored.replies.is_empty());
        assert_ne!(stored.post.timestamp, DateTime::<Utc>::default());
    }

    #[tokio::test]
    async fn finalization_applies_to_replies() {
        let (board, _) = board().await;
        board.add_thread(draft_thread("op")).await.unwrap();
        board.add_post("0", Post::new("", "sage", "reply")).await.unwrap();

        let reply = &board.get_thread("0").await.unwrap().replies[0];
        assert_eq!(reply.name, "Anonymous");
        assert_eq!(reply.email, "");
        assert_eq!(reply.meta, "sage");
        assert_eq!(reply.no, 1);
    }

    #[tokio::test]
    async fn quotes_link_back_to_root_and_replies() {
        let (board, _) = board().await;
        board.add_thread(draft_thread("op")).await.unwrap();
        board.add_post("0", Post::new("", "", "first reply")).await.unwrap();
        let no = board
            .add_post("0", Post::new("", "", ">>0\n>>1\nNew Line"))
            .await
            .unwrap();

        let thread = board.get_thread("0").await.unwrap();
        assert_eq!(thread.post.quoted_by, vec![no]);
        assert_eq!(thread.replies[0].quoted_by, vec![no]);
        assert!(thread.replies[1].quoted_by.is_empty());

        let formats: Vec<_> = thread.replies[1]
            .comment_segments
            .iter()
            .map(|s| s.format.clone())
            .collect();
        assert_eq!(formats, vec![vec![Format::NoQuote], vec![Format::NoQuote], vec![]]);
    }

    #[tokio::test]
    async fn repeated_quotes_accumulate() {
        let (board, _) = board().await;
        board.add_thread(draft_thread("op")).await.unwrap();
        board.add_post("0", Post::new("", "", ">>0\n>>0")).await.unwrap();
        board.add_post("0", Post::new("", "", ">>0")).await.unwrap();

        assert_eq!(board.get_thread("0").await.unwrap().post.quoted_by, vec![1, 1, 2]);
    }

    #[tokio::test]
    async fn quotes_outside_thread_are_ignored() {
        let (board, _) = board().await;
        board.add_thread(draft_thread("a")).await.unwrap();
        board.add_thread(draft_thread("b")).await.unwrap();
        board.add_post("1", Post::new("", "", ">>0\n>>500")).await.unwrap();

        assert!(board.get_thread("0").await.unwrap().post.quoted_by.is_empty());
        assert!(board.get_thread("1").await.unwrap().post.quoted_by.is_empty());
    }

    #[tokio::test]
    async fn new_thread_quotes_are_not_applied() {
        let (board, _) = board().await;
        board.add_thread(draft_thread("op")).await.unwrap();
        board.add_thread(draft_thread(">>0")).await.unwrap();

        assert!(board.get_thread("0").await.unwrap().post.quoted_by.is_empty());
    }

    #[tokio::test]
    async fn reply_to_missing_thread_burns_nothing() {
        let (board, db) = board().await;
        board.add_thread(draft_thread("op")).await.unwrap();
        let keys_before = db.len();

        let err = board.add_post("42", Post::new("", "", "hello")).await.unwrap_err();

        assert_eq!(err, AppError::NotFound("thread".into(), "42".into()));
        assert_eq!(board.post_count().await.unwrap(), 1);
        assert_eq!(db.len(), keys_before);
        assert_eq!(listing(&board).await, vec![0]);
    }

    #[tokio::test]
    async fn get_thread_not_found_cases() {
        let (board, db) = board().await;
        assert!(board.get_thread("7").await.unwrap_err().is_not_found());

        db.set("7", "{garbage").await.unwrap();
        assert!(board.get_thread("7").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn listing_is_newest_first() {
        let (board, _) = board().await;
        for comment in ["a", "b", "c"] {
            board.add_thread(draft_thread(comment)).await.unwrap();
        }
        assert_eq!(listing(&board).await, vec![2, 1, 0]);
    }

    #[tokio::test]
    async fn listing_of_unknown_board_is_empty() {
        let (board, _) = board().await;
        board.add_thread(draft_thread("a")).await.unwrap();
        assert!(board.get_all_threads("/other/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reply_bumps_thread() {
        let (board, _) = board().await;
        board.add_thread(draft_thread("a")).await.unwrap();
        board.add_thread(draft_thread("b")).await.unwrap();
        board.add_post("0", Post::new("", "", "bump")).await.unwrap();

        assert_eq!(listing(&board).await, vec![0, 1]);
    }

    #[tokio::test]
    async fn sage_reply_does_not_bump() {
        let (board, _) = board().await;
        board.add_thread(draft_thread("a")).await.unwrap();
        board.add_thread(draft_thread("b")).await.unwrap();
        board.add_post("0", Post::new("", "sage", "no bump")).await.unwrap();

        assert_eq!(listing(&board).await, vec![1, 0]);
    }

    #[tokio::test]
    async fn never_policy_keeps_creation_order() {
        let db = Arc::new(MemoryStore::new());
        let board = BoardStore::open(BOARD, db, BumpPolicy::Never).await.unwrap();
        board.add_thread(draft_thread("a")).await.unwrap();
        board.add_thread(draft_thread("b")).await.unwrap();
        board.add_post("0", Post::new("", "", "reply")).await.unwrap();

        assert_eq!(listing(&board).await, vec![1, 0]);
    }

    #[tokio::test]
    async fn listing_fails_fast_on_missing_document() {
        let (board, db) = board().await;
        board.add_thread(draft_thread("a")).await.unwrap();
        board.add_thread(draft_thread("b")).await.unwrap();
        db.remove("0").await.unwrap();

        let err = board.get_all_threads(BOARD).await.unwrap_err();
        assert!(matches!(err, AppError::Storage(_)));
    }

    #[tokio::test]
    async fn listing_fails_fast_on_corrupt_document() {
        let (board, db) = board().await;
        board.add_thread(draft_thread("a")).await.unwrap();
        db.set("0", "not a thread").await.unwrap();

        let err = board.get_all_threads(BOARD).await.unwrap_err();
        assert!(matches!(err, AppError::Storage(_)));
    }

    #[tokio::test]
    async fn failed_write_burns_the_number() {
        let counter = Arc::new(MemoryStore::new());
        let index = Arc::new(MemoryStore::new());
        let mut docs = MockKeyValueStore::new();
        docs.expect_set()
            .returning(|_, _| Err(AppError::storage("disk full")));

        let board = BoardStore::with_parts(
            BOARD,
            Arc::new(docs),
            counter.clone(),
            index.clone(),
            BumpPolicy::default(),
        )
        .await
        .unwrap();

        let err = board.add_thread(draft_thread("a")).await.unwrap_err();
        assert!(matches!(err, AppError::Storage(_)));
        assert_eq!(counter.get("/obj/:no").await.unwrap(), "1");
        assert!(index.get_all_ordered_by_score(BOARD).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn counter_failure_surfaces_as_storage_error() {
        let mut counter = MockKeyValueStore::new();
        counter.expect_set_if_absent().returning(|_, _| Ok(true));
        counter
            .expect_increment()
            .returning(|_| Err(AppError::storage("connection refused")));
        let db = Arc::new(MemoryStore::new());

        let board = BoardStore::with_parts(
            BOARD,
            db.clone(),
            Arc::new(counter),
            db.clone(),
            BumpPolicy::default(),
        )
        .await
        .unwrap();

        let err = board.add_thread(draft_thread("a")).await.unwrap_err();
        assert_eq!(err, AppError::storage("connection refused"));
        assert!(db.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers_get_unique_numbers() {
        let (board, _) = board().await;
        let board = Arc::new(board);
        board.add_thread(draft_thread("op")).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..60 {
            let board = board.clone();
            handles.push(tokio::spawn(async move {
                if i % 3 == 0 {
                    board.add_thread(draft_thread("t")).await.unwrap()
                } else {
                    board.add_post("0", Post::new("", "", ">>0")).await.unwrap()
                }
            }));
        }

        let mut numbers = HashSet::new();
        for handle in handles {
            assert!(numbers.insert(handle.await.unwrap()));
        }
        assert_eq!(numbers, (1..=60).collect::<HashSet<u64>>());

        // No reply is lost to a concurrent write on the same thread.
        let thread = board.get_thread("0").await.unwrap();
        assert_eq!(thread.replies.len(), 40);
        assert_eq!(thread.post.quoted_by.len(), 40);
        assert_eq!(listing(&board).await.len(), 21);
    }

    #[tokio::test]
    async fn open_never_resets_a_live_counter() {
        let db = Arc::new(MemoryStore::new());
        let first = BoardStore::open(BOARD, db.clone(), BumpPolicy::default()).await.unwrap();
        first.add_thread(draft_thread("a")).await.unwrap();

        // A second process joining the same store keeps counting.
        let second = BoardStore::open(BOARD, db, BumpPolicy::default()).await.unwrap();
        assert_eq!(second.add_thread(draft_thread("b")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn scores_increase_even_when_the_clock_does_not() {
        let (board, _) = board().await;
        let now = Utc::now();
        let first = board.next_score(&now);
        let same = board.next_score(&now);
        let earlier = board.next_score(&(now - chrono::Duration::seconds(5)));

        assert_eq!(first, now.timestamp_micros());
        assert!(first < same && same < earlier);
    }

    #[tokio::test]
    async fn index_failure_keeps_the_stored_thread() {
        let db = Arc::new(MemoryStore::new());
        let mut index = MockOrderedStore::new();
        index
            .expect_set_ordered()
            .returning(|_, _, _| Err(AppError::storage("connection reset")));

        let board = BoardStore::with_parts(
            BOARD,
            db.clone(),
            db.clone(),
            Arc::new(index),
            BumpPolicy::default(),
        )
        .await
        .unwrap();

        let err = board.add_thread(draft_thread("a")).await.unwrap_err();
        assert_eq!(err, AppError::storage("connection reset"));
        assert_eq!(board.get_thread("0").await.unwrap().post.comment, "a");
    }

    #[test]
    fn bump_policy_parsing() {
        assert_eq!("always".parse::<BumpPolicy>().unwrap(), BumpPolicy::Always);
        assert_eq!("unless-sage".parse::<BumpPolicy>().unwrap(), BumpPolicy::UnlessSage);
        assert_eq!("never".parse::<BumpPolicy>().unwrap(), BumpPolicy::Never);
        assert!("sometimes".parse::<BumpPolicy>().is_err());
    }
}
