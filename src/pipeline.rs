//! Orchestrates a full run: enumerate market files, filter by sport, build
//! each file's ladder, and persist the results.
//!
//! The source's multiprocess mode submits one thread-pool task per file but
//! only ever awaits the last submitted future — every other task's result
//! (and any exception it raised) is silently discarded. `Orchestrator::run`
//! fixes this: every spawned per-file task is awaited via `JoinSet`, so a
//! failure anywhere in the batch is observed and logged rather than lost.

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::{AppConfig, Sport};
use crate::error::Result;
use crate::filters::market_matches;
use crate::io::{is_market_file, BlobStore, DocumentStore};
use crate::ladder_builder::LadderBuilder;
use crate::market_definition::MarketDefinition;
use crate::packet::PacketDecoder;

pub struct Orchestrator {
    blob_store: Arc<dyn BlobStore>,
    decompressor: Arc<dyn crate::io::Decompressor>,
    document_store: Arc<dyn DocumentStore>,
    sport: Sport,
    worker_concurrency: usize,
    batch_size: usize,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub files_seen: usize,
    pub files_processed: usize,
    pub files_skipped_filter: usize,
    pub files_failed: usize,
}

impl Orchestrator {
    pub fn new(
        blob_store: Arc<dyn BlobStore>,
        decompressor: Arc<dyn crate::io::Decompressor>,
        document_store: Arc<dyn DocumentStore>,
        config: &AppConfig,
    ) -> Self {
        Self {
            blob_store,
            decompressor,
            document_store,
            sport: config.sport,
            worker_concurrency: config.pipeline.worker_concurrency.max(1),
            batch_size: config.pipeline.batch_size.max(1),
        }
    }

    pub async fn run(&self) -> Result<RunSummary> {
        let keys: Vec<String> = self
            .blob_store
            .list_keys()
            .await?
            .into_iter()
            .filter(|k| is_market_file(k))
            .collect();

        info!(count = keys.len(), folder_files = "market", "enumerated files to process");

        let mut summary = RunSummary { files_seen: keys.len(), ..Default::default() };
        let mut tasks: JoinSet<Result<FileOutcome>> = JoinSet::new();
        let mut remaining = keys.into_iter();

        // Keep at most `worker_concurrency` tasks in flight; refill as each
        // one completes. This is the bounded-pool equivalent of the
        // source's `ThreadPoolExecutor(max_workers=...)`, except every task
        // submitted is also awaited.
        for key in remaining.by_ref().take(self.worker_concurrency) {
            self.spawn_file_task(&mut tasks, key);
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(outcome)) => Self::record(&mut summary, outcome),
                Ok(Err(e)) => {
                    summary.files_failed += 1;
                    error!(error = %e, "file processing failed");
                }
                Err(join_err) => {
                    summary.files_failed += 1;
                    error!(error = %join_err, "file processing task panicked");
                }
            }
            if let Some(key) = remaining.next() {
                self.spawn_file_task(&mut tasks, key);
            }
        }

        Ok(summary)
    }

    fn spawn_file_task(&self, tasks: &mut JoinSet<Result<FileOutcome>>, key: String) {
        let blob_store = self.blob_store.clone();
        let decompressor = self.decompressor.clone();
        let document_store = self.document_store.clone();
        let sport = self.sport;
        let batch_size = self.batch_size;
        tasks.spawn(async move {
            process_file(blob_store, decompressor, document_store, sport, batch_size, key).await
        });
    }

    fn record(summary: &mut RunSummary, outcome: FileOutcome) {
        match outcome {
            FileOutcome::Processed => summary.files_processed += 1,
            FileOutcome::SkippedFilter => summary.files_skipped_filter += 1,
        }
    }
}

enum FileOutcome {
    Processed,
    SkippedFilter,
}

async fn process_file(
    blob_store: Arc<dyn BlobStore>,
    decompressor: Arc<dyn crate::io::Decompressor>,
    document_store: Arc<dyn DocumentStore>,
    sport: Sport,
    batch_size: usize,
    key: String,
) -> Result<FileOutcome> {
    let lines = match blob_store.read_lines(&key, decompressor.as_ref()).await {
        Ok(lines) => lines,
        Err(e) => {
            warn!(key, error = %e, "skipping file that failed to decompress");
            return Ok(FileOutcome::SkippedFilter);
        }
    };
    if lines.is_empty() {
        warn!(key, "skipping empty file");
        return Ok(FileOutcome::SkippedFilter);
    }

    let first_decoded = PacketDecoder::decode(&key, 1, &lines[0])?;
    let Some(raw_market_definition) = first_decoded.market_change.market_definition.clone() else {
        warn!(key, "first packet has no marketDefinition, skipping");
        return Ok(FileOutcome::SkippedFilter);
    };
    let market_definition = MarketDefinition::from_raw(&raw_market_definition)?;

    if !market_matches(sport, market_definition.market_type.as_deref(), market_definition.country_code.as_deref()) {
        return Ok(FileOutcome::SkippedFilter);
    }

    let output = LadderBuilder::build(&key, sport, &lines)?;
    let market_id = output.metadata.market_id.clone();

    let metadata_json = serde_json::to_value(&output.metadata)?;
    let insert_outcome = document_store.insert_metadata(&market_id, &metadata_json).await?;
    if insert_outcome == crate::io::MetadataInsertOutcome::Duplicate {
        warn!(key, market_id, "metadata already present, skipping dependent ladder/raw batches");
        return Ok(FileOutcome::Processed);
    }

    let ladder_docs: Vec<serde_json::Value> =
        output.ladders.iter().map(serde_json::to_value).collect::<std::result::Result<_, _>>()?;
    for batch in ladder_docs.chunks(batch_size) {
        document_store.insert_ladders(&market_id, batch).await?;
    }

    for batch in output.raw_packets.chunks(batch_size) {
        document_store.insert_raw_marketdata(&market_id, batch).await?;
    }

    info!(key, market_id, "finished processing file");
    Ok(FileOutcome::Processed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DocumentStoreConfig, LoggingConfig, PipelineConfig, SourceConfig};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeBlobStore {
        files: Vec<(String, Vec<String>)>,
    }

    #[async_trait]
    impl BlobStore for FakeBlobStore {
        async fn list_keys(&self) -> Result<Vec<String>> {
            Ok(self.files.iter().map(|(k, _)| k.clone()).collect())
        }

        async fn read_lines(&self, key: &str, _decompressor: &dyn crate::io::Decompressor) -> Result<Vec<String>> {
            Ok(self.files.iter().find(|(k, _)| k == key).map(|(_, lines)| lines.clone()).unwrap_or_default())
        }
    }

    #[derive(Default)]
    struct FakeDocumentStore {
        metadata_writes: Mutex<usize>,
        ladder_writes: Mutex<usize>,
    }

    #[async_trait]
    impl DocumentStore for FakeDocumentStore {
        async fn insert_metadata(
            &self,
            _market_id: &str,
            _document: &serde_json::Value,
        ) -> Result<crate::io::MetadataInsertOutcome> {
            *self.metadata_writes.lock().unwrap() += 1;
            Ok(crate::io::MetadataInsertOutcome::Inserted)
        }

        async fn insert_ladders(&self, _market_id: &str, documents: &[serde_json::Value]) -> Result<()> {
            *self.ladder_writes.lock().unwrap() += documents.len();
            Ok(())
        }

        async fn insert_raw_marketdata(&self, _market_id: &str, _documents: &[serde_json::Value]) -> Result<()> {
            Ok(())
        }
    }

    fn market_definition_line() -> String {
        r#"{"pt":1000,"mc":[{"id":"1.123","marketDefinition":{"eventId":"evt1","marketType":"WIN","countryCode":"GB","name":"Race","openDate":"2023-01-03T12:00:00.000Z","marketTime":"2023-01-03T13:00:00.000Z","suspendTime":"2023-01-03T13:00:00.000Z","inPlay":false,"runners":[{"id":1,"name":"A","status":"ACTIVE"}]}}]}"#.to_string()
    }

    #[tokio::test]
    async fn run_processes_every_matching_file_and_skips_non_matching() {
        let blob_store = Arc::new(FakeBlobStore {
            files: vec![
                ("1.123.bz2".to_string(), vec![market_definition_line()]),
                ("1.124.bz2".to_string(), vec![r#"{"pt":1000,"mc":[{"id":"1.124","marketDefinition":{"eventId":"evt2","marketType":"PLACE","countryCode":"GB","name":"Race","openDate":"2023-01-03T12:00:00.000Z","marketTime":"2023-01-03T13:00:00.000Z","suspendTime":"2023-01-03T13:00:00.000Z","inPlay":false,"runners":[{"id":1,"name":"A","status":"ACTIVE"}]}}]}"#.to_string()]),
            ],
        });
        let document_store = Arc::new(FakeDocumentStore::default());
        let config = AppConfig {
            source: SourceConfig { folder: "x".to_string() },
            sport: Sport::Horseracing,
            document_store: DocumentStoreConfig { uri: "postgres://x".to_string(), max_connections: 1 },
            pipeline: PipelineConfig { is_multiprocess: true, worker_concurrency: 2, batch_size: 1000 },
            logging: LoggingConfig::default(),
        };

        let orchestrator = Orchestrator::new(blob_store, Arc::new(PlainTextDecompressorForTest), document_store.clone(), &config);
        let summary = orchestrator.run().await.unwrap();

        assert_eq!(summary.files_seen, 2);
        assert_eq!(summary.files_processed, 1);
        assert_eq!(summary.files_skipped_filter, 1);
        assert_eq!(*document_store.metadata_writes.lock().unwrap(), 1);
    }

    struct PlainTextDecompressorForTest;
    impl crate::io::Decompressor for PlainTextDecompressorForTest {
        fn decompress(&self, _key: &str, bytes: &[u8]) -> Result<Vec<String>> {
            Ok(std::str::from_utf8(bytes).unwrap_or("").lines().map(str::to_string).collect())
        }
    }

    #[derive(Default)]
    struct DuplicateMetadataDocumentStore {
        ladder_writes: Mutex<usize>,
        raw_writes: Mutex<usize>,
    }

    #[async_trait]
    impl DocumentStore for DuplicateMetadataDocumentStore {
        async fn insert_metadata(
            &self,
            _market_id: &str,
            _document: &serde_json::Value,
        ) -> Result<crate::io::MetadataInsertOutcome> {
            Ok(crate::io::MetadataInsertOutcome::Duplicate)
        }

        async fn insert_ladders(&self, _market_id: &str, documents: &[serde_json::Value]) -> Result<()> {
            *self.ladder_writes.lock().unwrap() += documents.len();
            Ok(())
        }

        async fn insert_raw_marketdata(&self, _market_id: &str, documents: &[serde_json::Value]) -> Result<()> {
            *self.raw_writes.lock().unwrap() += documents.len();
            Ok(())
        }
    }

    #[tokio::test]
    async fn duplicate_metadata_insert_skips_dependent_ladder_and_raw_batches() {
        let blob_store = Arc::new(FakeBlobStore {
            files: vec![("1.123.bz2".to_string(), vec![market_definition_line()])],
        });
        let document_store = Arc::new(DuplicateMetadataDocumentStore::default());
        let config = AppConfig {
            source: SourceConfig { folder: "x".to_string() },
            sport: Sport::Horseracing,
            document_store: DocumentStoreConfig { uri: "postgres://x".to_string(), max_connections: 1 },
            pipeline: PipelineConfig::default(),
            logging: LoggingConfig::default(),
        };

        let orchestrator = Orchestrator::new(blob_store, Arc::new(PlainTextDecompressorForTest), document_store.clone(), &config);
        let summary = orchestrator.run().await.unwrap();

        assert_eq!(summary.files_processed, 1);
        assert_eq!(*document_store.ladder_writes.lock().unwrap(), 0);
        assert_eq!(*document_store.raw_writes.lock().unwrap(), 0);
    }
}
