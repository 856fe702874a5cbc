//! Sheet sources
//!
//! A sheet is a grid of strings. [`CsvFileSource`] reads local CSV exports,
//! [`CachedSheetSource`] keeps downloads in the durable store for a while.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use action_flow::MacroLibrary;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sheetpilot_scheduler::persist::CACHE_KEY_PREFIX;
use sheetpilot_scheduler::{StateStorage, StorageError};
use thiserror::Error;
use tracing::{debug, info, warn};

pub type SheetRows = Vec<Vec<String>>;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("cannot read sheet {0}: {1}")]
    Io(String, String),
    #[error("malformed CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Identifies one tab of one spreadsheet
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SheetRef {
    pub sheet_id: String,
    pub gid: String,
}

impl SheetRef {
    pub fn new(sheet_id: impl Into<String>, gid: impl Into<String>) -> Self {
        Self {
            sheet_id: sheet_id.into(),
            gid: gid.into(),
        }
    }

    pub fn cache_key(&self) -> String {
        format!("{}{}:{}", CACHE_KEY_PREFIX, self.sheet_id, self.gid)
    }
}

#[async_trait]
pub trait SheetSource: Send + Sync {
    async fn fetch(&self, sheet: &SheetRef) -> Result<SheetRows, SourceError>;
}

/// Parses CSV text into rows. Rows may have different lengths.
pub fn parse_csv(text: &str) -> Result<SheetRows, SourceError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(rows)
}

/// Treats the sheet id as a path to a CSV file. A CSV file has a single tab,
/// so the gid only distinguishes cache entries.
#[derive(Clone, Debug, Default)]
pub struct CsvFileSource {
    root: Option<PathBuf>,
}

impl CsvFileSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves relative sheet ids against `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn path_for(&self, sheet: &SheetRef) -> PathBuf {
        match &self.root {
            Some(root) => root.join(&sheet.sheet_id),
            None => PathBuf::from(&sheet.sheet_id),
        }
    }
}

#[async_trait]
impl SheetSource for CsvFileSource {
    async fn fetch(&self, sheet: &SheetRef) -> Result<SheetRows, SourceError> {
        let path = self.path_for(sheet);
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|err| SourceError::Io(path.display().to_string(), err.to_string()))?;
        let rows = parse_csv(&text)?;
        debug!(path = %path.display(), rows = rows.len(), "sheet loaded");
        Ok(rows)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    data: SheetRows,
    /// Milliseconds since the epoch
    #[serde(default)]
    timestamp: Option<i64>,
}

impl CacheEntry {
    fn is_fresh(&self, ttl: Duration, now_ms: i64) -> bool {
        match self.timestamp {
            Some(ts) => now_ms.saturating_sub(ts) < ttl.as_millis() as i64,
            None => false,
        }
    }
}

/// Serves a sheet from the durable store while its entry is younger than
/// the TTL, falling back to the inner source.
pub struct CachedSheetSource<S> {
    inner: S,
    storage: Arc<dyn StateStorage>,
    ttl: Duration,
}

impl<S: SheetSource> CachedSheetSource<S> {
    pub fn new(inner: S, storage: Arc<dyn StateStorage>, ttl: Duration) -> Self {
        Self {
            inner,
            storage,
            ttl,
        }
    }

    /// Fetches `sheet`, bypassing the cache when `force` is set.
    pub async fn load(&self, sheet: &SheetRef, force: bool) -> Result<SheetRows, SourceError> {
        let key = sheet.cache_key();
        if !force {
            match self.storage.load(&key).await {
                Ok(Some(bytes)) => match serde_json::from_slice::<CacheEntry>(&bytes) {
                    Ok(entry) if entry.is_fresh(self.ttl, Utc::now().timestamp_millis()) => {
                        debug!(key, "sheet cache hit");
                        return Ok(entry.data);
                    }
                    Ok(_) => debug!(key, "sheet cache stale"),
                    Err(err) => warn!("Ignoring corrupt cache entry {}: {}", key, err),
                },
                Ok(None) => {}
                Err(err) => warn!("Sheet cache unavailable: {}", err),
            }
        }

        let data = self.inner.fetch(sheet).await?;
        self.store(&key, &data).await;
        Ok(data)
    }

    async fn store(&self, key: &str, data: &SheetRows) {
        let entry = CacheEntry {
            data: data.clone(),
            timestamp: Some(Utc::now().timestamp_millis()),
        };
        let bytes = match serde_json::to_vec(&entry) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("Cannot encode cache entry {}: {}", key, err);
                return;
            }
        };
        match self.storage.save(key, &bytes).await {
            Ok(()) => {}
            Err(StorageError::QuotaExceeded { .. }) => {
                // one retry after evicting stale entries
                if let Err(err) = self.clear_expired().await {
                    warn!("Cache cleanup failed: {}", err);
                }
                if let Err(err) = self.storage.save(key, &bytes).await {
                    warn!("Sheet not cached: {}", err);
                }
            }
            Err(err) => warn!("Sheet not cached: {}", err),
        }
    }

    /// Removes cache entries that are stale or carry no timestamp.
    pub async fn clear_expired(&self) -> Result<usize, StorageError> {
        let now = Utc::now().timestamp_millis();
        let mut removed = 0;
        for key in self.storage.keys().await? {
            if !key.starts_with(CACHE_KEY_PREFIX) {
                continue;
            }
            let fresh = match self.storage.load(&key).await? {
                Some(bytes) => serde_json::from_slice::<CacheEntry>(&bytes)
                    .map(|entry| entry.is_fresh(self.ttl, now))
                    .unwrap_or(false),
                None => continue,
            };
            if !fresh {
                self.storage.remove(&key).await?;
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "removed old sheet caches");
        }
        Ok(removed)
    }
}

#[async_trait]
impl<S: SheetSource> SheetSource for CachedSheetSource<S> {
    async fn fetch(&self, sheet: &SheetRef) -> Result<SheetRows, SourceError> {
        self.load(sheet, false).await
    }
}

/// Reads a macro sheet laid out one macro per row: name in column A,
/// commands in B onwards. A `MacroName` header row and invalid names are
/// skipped.
pub fn macros_from_rows(rows: &[Vec<String>]) -> MacroLibrary {
    let mut library = MacroLibrary::new();
    for row in rows {
        let Some((name, commands)) = row.split_first() else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() || name.eq_ignore_ascii_case("macroname") {
            continue;
        }
        let commands: Vec<String> = commands
            .iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
        if commands.is_empty() {
            continue;
        }
        if let Err(err) = library.insert(name, commands) {
            warn!("Skipping macro row: {}", err);
        }
    }
    library
}

#[cfg(test)]
mod tests {
    use super::*;
    use action_flow::MacroResolver;
    use sheetpilot_scheduler::MemoryStorage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SheetSource for CountingSource {
        async fn fetch(&self, _sheet: &SheetRef) -> Result<SheetRows, SourceError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![vec![format!("fetch {}", n)]])
        }
    }

    fn counting() -> CountingSource {
        CountingSource {
            calls: AtomicUsize::new(0),
        }
    }

    #[test]
    fn parses_quoted_and_ragged_csv() {
        let rows = parse_csv("a,\"b, c\",d\n1,2\n\"x\"\"y\",,\n").unwrap();
        assert_eq!(rows[0], vec!["a", "b, c", "d"]);
        assert_eq!(rows[1], vec!["1", "2"]);
        assert_eq!(rows[2], vec!["x\"y", "", ""]);
    }

    #[tokio::test]
    async fn fresh_entries_are_served_from_the_store() {
        let storage = Arc::new(MemoryStorage::new());
        let source = CachedSheetSource::new(counting(), storage.clone(), Duration::from_secs(300));
        let sheet = SheetRef::new("1AbC", "0");

        assert_eq!(source.fetch(&sheet).await.unwrap()[0][0], "fetch 0");
        assert_eq!(source.fetch(&sheet).await.unwrap()[0][0], "fetch 0");
        assert!(storage.get("csv_cache:1AbC:0").is_some());

        assert_eq!(source.load(&sheet, true).await.unwrap()[0][0], "fetch 1");
        // another tab of the same sheet has its own entry
        let other = SheetRef::new("1AbC", "7");
        assert_eq!(source.fetch(&other).await.unwrap()[0][0], "fetch 2");
    }

    #[tokio::test]
    async fn stale_entries_are_refetched_and_cleared() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .save("csv_cache:old:0", br#"{"data":[["x"]]}"#)
            .await
            .unwrap();
        storage.save("bgState", b"{}").await.unwrap();

        let source = CachedSheetSource::new(counting(), storage.clone(), Duration::ZERO);
        let sheet = SheetRef::new("s", "0");
        source.fetch(&sheet).await.unwrap();
        assert_eq!(source.fetch(&sheet).await.unwrap()[0][0], "fetch 1");

        assert_eq!(source.clear_expired().await.unwrap(), 2);
        assert_eq!(storage.keys().await.unwrap(), vec!["bgState".to_string()]);
    }

    #[tokio::test]
    async fn reads_csv_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("sheet.csv"), "h1,h2\nv1,v2\n").unwrap();
        let source = CsvFileSource::with_root(dir.path());
        let rows = source.fetch(&SheetRef::new("sheet.csv", "0")).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(matches!(
            source.fetch(&SheetRef::new("missing.csv", "0")).await,
            Err(SourceError::Io(..))
        ));
    }

    #[tokio::test]
    async fn macro_rows_become_a_library() {
        let rows = parse_csv(
            "MacroName,Step 1,Step 2\nlogin,\"fill(//input[@name='u'], {0})\",click(//button)\nbad-name,click(//a)\nempty,,\n",
        )
        .unwrap();
        let library = macros_from_rows(&rows);
        assert_eq!(library.names().collect::<Vec<_>>(), vec!["login"]);
        assert_eq!(library.resolve("login").await.unwrap().len(), 2);
    }
}
