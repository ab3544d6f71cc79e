//! External-collaborator contracts: where packet files come from, how they
//! are decompressed, and where the built documents go. Concrete
//! implementations are intentionally lightweight — production deployments
//! are expected to swap these out for their own blob store / document store.

use std::io::Read as _;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::debug;

use crate::error::{LadderError, Result};

/// Lists and reads compressed market-data blobs under a folder/prefix.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Keys under the configured folder, in no particular order.
    async fn list_keys(&self) -> Result<Vec<String>>;

    /// Reads and decompresses one blob into its newline-delimited lines.
    async fn read_lines(&self, key: &str, decompressor: &dyn Decompressor) -> Result<Vec<String>>;
}

/// Whether a blob key names a market-data file worth processing. Betfair
/// market files are named `"1.<marketId>..."`; any other prefix (e.g. `"2."`)
/// is a different kind of file this crate doesn't understand.
pub fn is_market_file(key: &str) -> bool {
    key.rsplit('/').next().unwrap_or(key).starts_with("1.")
}

/// Decompresses raw blob bytes into UTF-8 text lines.
pub trait Decompressor: Send + Sync {
    fn decompress(&self, key: &str, bytes: &[u8]) -> Result<Vec<String>>;
}

/// Decodes bz2-compressed market-data blobs, the format Betfair history
/// files are shipped in.
pub struct Bz2Decompressor;

impl Decompressor for Bz2Decompressor {
    fn decompress(&self, key: &str, bytes: &[u8]) -> Result<Vec<String>> {
        let mut reader = bzip2::read::BzDecoder::new(bytes);
        let mut text = String::new();
        reader.read_to_string(&mut text).map_err(|e| LadderError::DecompressionFailure {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        Ok(text.lines().map(str::to_string).collect())
    }
}

/// Passes plain-text blobs straight through, for local fixtures and tests.
pub struct PlainTextDecompressor;

impl Decompressor for PlainTextDecompressor {
    fn decompress(&self, key: &str, bytes: &[u8]) -> Result<Vec<String>> {
        let text = std::str::from_utf8(bytes).map_err(|e| LadderError::DecompressionFailure {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        Ok(text.lines().map(str::to_string).collect())
    }
}

/// Enumerates and reads blobs from a local directory tree, standing in for
/// the S3 bucket the source reads from.
pub struct LocalDirBlobStore {
    root: PathBuf,
}

impl LocalDirBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn walk(dir: &Path, out: &mut Vec<String>) -> std::io::Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                Self::walk(&path, out)?;
            } else if let Some(s) = path.to_str() {
                out.push(s.to_string());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for LocalDirBlobStore {
    async fn list_keys(&self) -> Result<Vec<String>> {
        let root = self.root.clone();
        let keys = tokio::task::spawn_blocking(move || {
            let mut out = Vec::new();
            Self::walk(&root, &mut out)?;
            Ok::<_, std::io::Error>(out)
        })
        .await
        .map_err(|e| LadderError::Other(e.into()))??;
        Ok(keys.into_iter().filter(|k| is_market_file(k)).collect())
    }

    async fn read_lines(&self, key: &str, decompressor: &dyn Decompressor) -> Result<Vec<String>> {
        let bytes = tokio::fs::read(key).await?;
        decompressor.decompress(key, &bytes)
    }
}

/// Whether a metadata insert landed a new document or hit the unique `_id`
/// index for a market already recorded. Callers use this to decide whether
/// to proceed with the dependent ladder/raw-marketdata batches — the source
/// skips them entirely when the metadata insert was a duplicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataInsertOutcome {
    Inserted,
    Duplicate,
}

/// The three logical output streams a ladder-builder run writes to.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn insert_metadata(&self, market_id: &str, document: &Value) -> Result<MetadataInsertOutcome>;
    async fn insert_ladders(&self, market_id: &str, documents: &[Value]) -> Result<()>;
    async fn insert_raw_marketdata(&self, market_id: &str, documents: &[Value]) -> Result<()>;
}

/// JSONB-backed document store emulating the timeseries-collection shape of
/// the original Mongo destination: one Postgres table per logical stream,
/// each row keyed by market id with its payload stored as `jsonb`.
pub struct PostgresDocumentStore {
    pool: PgPool,
    namespace: String,
}

impl PostgresDocumentStore {
    pub async fn connect(uri: &str, max_connections: u32, namespace: &str) -> Result<Self> {
        let pool = PgPoolOptions::new().max_connections(max_connections).connect(uri).await?;
        let store = Self { pool, namespace: namespace.to_string() };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        for table in ["metadata", "ladders", "marketdata"] {
            let table_name = self.table_name(table);
            sqlx::query(&format!(
                "CREATE TABLE IF NOT EXISTS {table_name} (
                    id BIGSERIAL PRIMARY KEY,
                    market_id TEXT NOT NULL,
                    document JSONB NOT NULL
                )"
            ))
            .execute(&self.pool)
            .await?;

            if table == "metadata" {
                // Emulates the "soft failure on duplicate" behavior of the
                // unique index the source relies on for metadata documents:
                // a second insert for the same market id is expected and
                // should be ignored, not treated as a pipeline error.
                let index_name = format!("{table_name}_market_id_uidx");
                sqlx::query(&format!(
                    "CREATE UNIQUE INDEX IF NOT EXISTS {index_name} ON {table_name} (market_id)"
                ))
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(())
    }

    fn table_name(&self, collection: &str) -> String {
        format!("{}_{}", self.namespace, collection)
    }
}

#[async_trait]
impl DocumentStore for PostgresDocumentStore {
    async fn insert_metadata(&self, market_id: &str, document: &Value) -> Result<MetadataInsertOutcome> {
        let table = self.table_name("metadata");
        let result = sqlx::query(&format!("INSERT INTO {table} (market_id, document) VALUES ($1, $2)"))
            .bind(market_id)
            .bind(document)
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => Ok(MetadataInsertOutcome::Inserted),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                debug!(market_id, "metadata already present, skipping duplicate insert");
                Ok(MetadataInsertOutcome::Duplicate)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn insert_ladders(&self, market_id: &str, documents: &[Value]) -> Result<()> {
        self.insert_batch("ladders", market_id, documents).await
    }

    async fn insert_raw_marketdata(&self, market_id: &str, documents: &[Value]) -> Result<()> {
        self.insert_batch("marketdata", market_id, documents).await
    }
}

impl PostgresDocumentStore {
    async fn insert_batch(&self, collection: &str, market_id: &str, documents: &[Value]) -> Result<()> {
        if documents.is_empty() {
            return Ok(());
        }
        let table = self.table_name(collection);
        let mut tx = self.pool.begin().await?;
        for document in documents {
            sqlx::query(&format!("INSERT INTO {table} (market_id, document) VALUES ($1, $2)"))
                .bind(market_id)
                .bind(document)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
