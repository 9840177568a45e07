//! Vector index over embedded corpus fragments
//!
//! Searches are served from an immutable [`IndexSnapshot`] behind an `Arc`.
//! Writers build a new snapshot and swap it in, so a retrieval that already
//! holds a snapshot keeps seeing one consistent version while a reload runs.
//! The index is persisted to SQLite together with the corpus version it was
//! built from, letting a restart skip re-embedding an unchanged corpus.

use parking_lot::{Mutex, RwLock};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::embeddings::normalize;
use crate::error::{Error, Result};
use crate::types::CorpusFragment;

/// What a persisted index was built from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMeta {
    pub corpus_version: String,
    pub count: usize,
    pub model: String,
    pub dimensions: usize,
}

/// One indexed fragment
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub fragment: Arc<CorpusFragment>,
    /// Unit-length embedding
    pub vector: Vec<f32>,
}

/// A query match
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub fragment: Arc<CorpusFragment>,
    pub score: f32,
}

impl SearchHit {
    pub fn id(&self) -> &str {
        &self.fragment.id
    }
}

/// Immutable view of the index at one point in time
#[derive(Debug, Default)]
pub struct IndexSnapshot {
    /// Entries in insertion order; position is the tie-break sequence
    entries: Vec<IndexEntry>,
    positions: HashMap<String, usize>,
    meta: Option<IndexMeta>,
}

impl IndexSnapshot {
    fn from_entries(entries: Vec<IndexEntry>, meta: Option<IndexMeta>) -> Self {
        let positions = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.fragment.id.clone(), i))
            .collect();
        Self {
            entries,
            positions,
            meta,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Corpus version this snapshot was built from, if built by a full rebuild
    pub fn corpus_version(&self) -> Option<&str> {
        self.meta.as_ref().map(|m| m.corpus_version.as_str())
    }

    /// Top-`k` entries by cosine similarity, descending, ties by insertion order
    pub fn query(&self, vector: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        if k == 0 || self.entries.is_empty() {
            return Ok(Vec::new());
        }

        let dims = self.entries[0].vector.len();
        if vector.len() != dims {
            return Err(Error::index(format!(
                "query has {} dimensions, index has {}",
                vector.len(),
                dims
            )));
        }

        let mut query = vector.to_vec();
        normalize(&mut query);

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(seq, entry)| {
                let dot: f32 = entry.vector.iter().zip(&query).map(|(a, b)| a * b).sum();
                (seq, dot)
            })
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(seq, score)| SearchHit {
                fragment: Arc::clone(&self.entries[seq].fragment),
                score,
            })
            .collect())
    }
}

/// SQLite persistence for the index
pub struct IndexStore {
    conn: Arc<Mutex<Connection>>,
}

impl IndexStore {
    /// Create or open the index database at the given path
    ///
    /// A file that is not a usable index database is moved aside to
    /// `<name>.corrupt` and replaced by an empty one; the next initialization
    /// rebuilds it from the corpus.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        match Self::open_existing(path) {
            Ok(store) => Ok(store),
            Err(e) if path.exists() => {
                let quarantine = sidecar(path, ".corrupt");
                tracing::warn!(
                    "Index database {} is unusable ({}), moving it to {} and starting empty",
                    path.display(),
                    e,
                    quarantine.display()
                );
                std::fs::rename(path, &quarantine)?;
                for suffix in ["-wal", "-shm"] {
                    let stale = sidecar(path, suffix);
                    if stale.exists() {
                        std::fs::remove_file(&stale)?;
                    }
                }
                Self::open_existing(path)
            }
            Err(e) => Err(e),
        }
    }

    fn open_existing(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| Error::index(format!("Failed to open index database: {}", e)))?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Create an in-memory database (for testing)
    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
        "#,
        )
        .map_err(|e| Error::index(format!("Failed to set pragmas: {}", e)))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS fragments (
                seq INTEGER PRIMARY KEY,
                id TEXT NOT NULL UNIQUE,
                fragment TEXT NOT NULL,
                embedding BLOB NOT NULL
            );

            CREATE TABLE IF NOT EXISTS index_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
        "#,
        )
        .map_err(|e| Error::index(format!("Failed to create index tables: {}", e)))?;

        Ok(())
    }

    /// Stored metadata, or `None` when no complete rebuild has been persisted
    fn read_meta(&self) -> Result<Option<IndexMeta>> {
        let conn = self.conn.lock();
        let get = |key: &str| -> Result<Option<String>> {
            Ok(conn
                .query_row(
                    "SELECT value FROM index_meta WHERE key = ?1",
                    params![key],
                    |row| row.get::<_, String>(0),
                )
                .optional()?)
        };

        let (Some(corpus_version), Some(count), Some(model), Some(dimensions)) = (
            get("corpus_version")?,
            get("count")?,
            get("model")?,
            get("dimensions")?,
        ) else {
            return Ok(None);
        };

        let parse = |name: &str, v: &str| {
            v.parse::<usize>()
                .map_err(|_| Error::index(format!("corrupt {} in index metadata: {}", name, v)))
        };

        Ok(Some(IndexMeta {
            corpus_version,
            count: parse("count", &count)?,
            model,
            dimensions: parse("dimensions", &dimensions)?,
        }))
    }

    fn load_entries(&self, dimensions: usize) -> Result<Vec<IndexEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id, fragment, embedding FROM fragments ORDER BY seq")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Vec<u8>>(2)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, fragment_json, blob) = row?;
            let fragment: CorpusFragment = serde_json::from_str(&fragment_json)
                .map_err(|e| Error::index(format!("corrupt fragment {}: {}", id, e)))?;
            let vector = decode_vector(&blob, dimensions)
                .ok_or_else(|| Error::index(format!("corrupt embedding for {}", id)))?;
            entries.push(IndexEntry {
                fragment: Arc::new(fragment),
                vector,
            });
        }
        Ok(entries)
    }

    /// Replace the whole persisted index in one transaction
    fn replace_all(&self, entries: &[IndexEntry], meta: &IndexMeta) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM fragments", [])?;
        tx.execute("DELETE FROM index_meta", [])?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO fragments (seq, id, fragment, embedding) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (seq, entry) in entries.iter().enumerate() {
                insert.execute(params![
                    seq as i64,
                    entry.fragment.id,
                    serde_json::to_string(entry.fragment.as_ref())?,
                    encode_vector(&entry.vector),
                ])?;
            }

            let mut put = tx.prepare("INSERT INTO index_meta (key, value) VALUES (?1, ?2)")?;
            put.execute(params!["corpus_version", meta.corpus_version])?;
            put.execute(params!["count", meta.count.to_string()])?;
            put.execute(params!["model", meta.model])?;
            put.execute(params!["dimensions", meta.dimensions.to_string()])?;
        }

        tx.commit()?;
        Ok(())
    }

    fn upsert(&self, seq: usize, entry: &IndexEntry) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO fragments (seq, id, fragment, embedding) VALUES (?1, ?2, ?3, ?4)",
            params![
                seq as i64,
                entry.fragment.id,
                serde_json::to_string(entry.fragment.as_ref())?,
                encode_vector(&entry.vector),
            ],
        )?;
        // No longer the output of a single full rebuild
        tx.execute("DELETE FROM index_meta WHERE key = 'corpus_version'", [])?;
        tx.commit()?;
        Ok(())
    }
}

/// Path next to the database with `suffix` appended to its file name
fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_vector(blob: &[u8], dimensions: usize) -> Option<Vec<f32>> {
    if blob.len() != dimensions * 4 {
        return None;
    }
    Some(
        blob.chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
    )
}

/// Shared vector index with snapshot swapping and optional persistence
pub struct VectorIndex {
    current: RwLock<Arc<IndexSnapshot>>,
    store: Option<IndexStore>,
    /// Serializes writers; readers never take it
    write_lock: Mutex<()>,
}

impl VectorIndex {
    /// Create an empty index backed by the given store
    pub fn new(store: Option<IndexStore>) -> Self {
        Self {
            current: RwLock::new(Arc::new(IndexSnapshot::default())),
            store,
            write_lock: Mutex::new(()),
        }
    }

    /// Create an index without persistence
    pub fn in_memory() -> Self {
        Self::new(None)
    }

    /// Open (or create) a persisted index
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(Some(IndexStore::open(path)?)))
    }

    /// Current snapshot; holders keep it alive across later swaps
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.current.read().clone()
    }

    pub fn len(&self) -> usize {
        self.current.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.read().is_empty()
    }

    /// Top-`k` fragments for `vector` from the current snapshot
    pub fn query(&self, vector: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        self.snapshot().query(vector, k)
    }

    /// Insert or replace one fragment
    ///
    /// A replaced fragment keeps its original insertion position.
    pub fn upsert(&self, id: &str, vector: Vec<f32>, fragment: CorpusFragment) -> Result<()> {
        if id != fragment.id {
            return Err(Error::index(format!(
                "upsert id {} does not match fragment id {}",
                id, fragment.id
            )));
        }

        let _guard = self.write_lock.lock();
        let old = self.snapshot();

        if let Some(first) = old.entries.first() {
            if first.vector.len() != vector.len() {
                return Err(Error::index(format!(
                    "vector has {} dimensions, index has {}",
                    vector.len(),
                    first.vector.len()
                )));
            }
        }

        let mut vector = vector;
        normalize(&mut vector);
        let entry = IndexEntry {
            fragment: Arc::new(fragment),
            vector,
        };

        let mut entries = old.entries.clone();
        let seq = match old.positions.get(id) {
            Some(&i) => {
                entries[i] = entry.clone();
                i
            }
            None => {
                entries.push(entry.clone());
                entries.len() - 1
            }
        };

        if let Some(store) = &self.store {
            store.upsert(seq, &entry)?;
        }

        *self.current.write() = Arc::new(IndexSnapshot::from_entries(entries, None));
        Ok(())
    }

    /// Replace the whole index with freshly embedded fragments
    ///
    /// Persisted in one transaction before the new snapshot is swapped in;
    /// on failure the previous snapshot stays current.
    pub fn rebuild(&self, items: Vec<(CorpusFragment, Vec<f32>)>, meta: IndexMeta) -> Result<()> {
        let _guard = self.write_lock.lock();

        let mut seen = HashMap::new();
        let mut entries: Vec<IndexEntry> = Vec::with_capacity(items.len());
        for (fragment, mut vector) in items {
            if vector.len() != meta.dimensions {
                return Err(Error::index(format!(
                    "fragment {} has {} dimensions, expected {}",
                    fragment.id,
                    vector.len(),
                    meta.dimensions
                )));
            }
            normalize(&mut vector);
            let entry = IndexEntry {
                fragment: Arc::new(fragment),
                vector,
            };
            match seen.get(&entry.fragment.id) {
                Some(&i) => entries[i] = entry,
                None => {
                    seen.insert(entry.fragment.id.clone(), entries.len());
                    entries.push(entry);
                }
            }
        }

        let meta = IndexMeta {
            count: entries.len(),
            ..meta
        };

        if let Some(store) = &self.store {
            store.replace_all(&entries, &meta)?;
        }

        tracing::info!(
            "Vector index rebuilt with {} entries (corpus {})",
            entries.len(),
            short_version(&meta.corpus_version)
        );
        *self.current.write() = Arc::new(IndexSnapshot::from_entries(entries, Some(meta)));
        Ok(())
    }

    /// Load the persisted index if it was built from exactly `expected`
    ///
    /// Returns `Ok(false)` when nothing usable is stored and `Err(Index)` when
    /// the stored data is corrupt; both mean the caller should rebuild.
    pub fn load_persisted(&self, expected: &IndexMeta) -> Result<bool> {
        let Some(store) = &self.store else {
            return Ok(false);
        };
        let _guard = self.write_lock.lock();

        let Some(meta) = store.read_meta()? else {
            return Ok(false);
        };
        if &meta != expected {
            tracing::info!(
                "Persisted index is stale (corpus {} / {} entries / {}), rebuilding",
                short_version(&meta.corpus_version),
                meta.count,
                meta.model
            );
            return Ok(false);
        }

        let entries = store.load_entries(meta.dimensions)?;
        if entries.len() != meta.count {
            return Err(Error::index(format!(
                "index metadata lists {} entries but {} are stored",
                meta.count,
                entries.len()
            )));
        }

        tracing::info!("Reusing persisted vector index ({} entries)", entries.len());
        *self.current.write() = Arc::new(IndexSnapshot::from_entries(entries, Some(meta)));
        Ok(true)
    }
}

fn short_version(version: &str) -> &str {
    version.get(..12).unwrap_or(version)
}
