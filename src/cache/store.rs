use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, ensure};
use tokio::fs as async_fs;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, trace};

use super::entry::CacheEntry;
use super::key::CacheKey;
use super::record::{self, CacheRecord};

/// Directory of standalone record files, one per cache key.
#[derive(Debug, Clone)]
pub struct RecordStore {
    dir: PathBuf,
}

/// Metadata for a record whose body is streamed from a file.
#[derive(Debug, Clone)]
pub struct StreamedRecord<'a> {
    pub created_at: i64,
    pub content_type: &'a str,
    pub validator: &'a str,
    pub body_path: &'a Path,
}

impl RecordStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.as_hex())
    }

    fn temp_path(&self) -> PathBuf {
        self.dir.join(format!("tmp_{}", uuid::Uuid::new_v4()))
    }

    pub async fn write(&self, entry: &CacheEntry) -> Result<PathBuf> {
        let key = entry.key()?;
        let encoded = record::encode(&entry.record());
        let temp_path = self.temp_path();
        let result = async {
            let mut file = self.create_temp(&temp_path).await?;
            file.write_all(&encoded).await?;
            file.flush().await?;
            file.sync_all().await?;
            Ok::<_, anyhow::Error>(())
        }
        .await;
        self.commit(result, &temp_path, &key).await?;
        debug!(
            key = %key,
            host = key.host(),
            path = key.path(),
            bytes = encoded.len(),
            "wrote cache record"
        );
        Ok(self.path_for(&key))
    }

    /// Writes the record header and then copies the body from `body_path` without
    /// holding it in memory. The body length comes from the file's metadata.
    pub async fn write_streamed(
        &self,
        key: &CacheKey,
        record: StreamedRecord<'_>,
    ) -> Result<PathBuf> {
        let mut body = async_fs::File::open(record.body_path)
            .await
            .with_context(|| format!("failed to open body file {}", record.body_path.display()))?;
        let body_len = body.metadata().await?.len();
        let header = record::encode_header(
            record.created_at,
            record.content_type,
            record.validator,
            body_len,
        );

        let temp_path = self.temp_path();
        let result = async {
            let file = self.create_temp(&temp_path).await?;
            let mut writer = BufWriter::new(file);
            writer.write_all(&header).await?;
            let copied = tokio::io::copy(&mut body, &mut writer).await?;
            ensure!(
                copied == body_len,
                "body file {} changed size while copying ({} of {} bytes)",
                record.body_path.display(),
                copied,
                body_len
            );
            writer.flush().await?;
            writer.get_ref().sync_all().await?;
            Ok::<_, anyhow::Error>(())
        }
        .await;
        self.commit(result, &temp_path, key).await?;
        debug!(
            key = %key,
            host = key.host(),
            path = key.path(),
            body_bytes = body_len,
            "wrote streamed cache record"
        );
        Ok(self.path_for(key))
    }

    pub async fn read(&self, key: &CacheKey) -> Result<CacheRecord> {
        Self::read_path(&self.path_for(key)).await
    }

    pub async fn read_path(path: &Path) -> Result<CacheRecord> {
        let data = async_fs::read(path)
            .await
            .with_context(|| format!("failed to read cache record {}", path.display()))?;
        let record = record::decode(&data)
            .with_context(|| format!("failed to decode cache record {}", path.display()))?;
        Ok(record)
    }

    async fn create_temp(&self, temp_path: &Path) -> Result<async_fs::File> {
        async_fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create record directory {}", self.dir.display()))?;
        let mut options = async_fs::OpenOptions::new();
        options.create(true).truncate(true).write(true);
        #[cfg(unix)]
        {
            options.mode(0o600);
        }
        options
            .open(temp_path)
            .await
            .with_context(|| format!("failed to create {}", temp_path.display()))
    }

    async fn commit(&self, written: Result<()>, temp_path: &Path, key: &CacheKey) -> Result<()> {
        if let Err(err) = written {
            let _ = async_fs::remove_file(temp_path).await;
            return Err(err);
        }
        let final_path = self.path_for(key);
        if let Err(err) = async_fs::rename(temp_path, &final_path).await {
            let _ = async_fs::remove_file(temp_path).await;
            return Err(anyhow!(err).context(format!(
                "failed to move record into place at {}",
                final_path.display()
            )));
        }
        trace!(path = %final_path.display(), "record committed");
        Ok(())
    }
}
