//! Content-addressed shard files.
//!
//! A shard is named after the SHA-256 of its members' times, so an unchanged
//! batch maps to the same file and is not rewritten. A changed batch lands in a
//! new file and the old one is removed by [`ShardStore::reconcile`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::codec::{Codec, ShardDocument};
use crate::error::{Result, StoreError};
use crate::models::PointRecord;

/// Records read back from one shard file.
#[derive(Debug, Clone)]
pub struct LoadedShard {
  pub file: String,
  pub codec: Codec,
  pub records: Vec<PointRecord>,
}

/// Directory of shard files.
#[derive(Debug, Clone)]
pub struct ShardStore {
  dir: PathBuf,
}

impl ShardStore {
  /// Open a shard directory, creating it when missing.
  pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
    let dir = dir.as_ref().to_path_buf();
    if !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
      info!(dir = %dir.display(), "creating data directory");
    }
    tokio::fs::create_dir_all(&dir)
      .await
      .map_err(|source| StoreError::CreateDir {
        path: dir.clone(),
        source,
      })?;
    Ok(Self { dir })
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  /// File name of the shard holding `records`.
  pub fn shard_name(records: &[PointRecord]) -> String {
    let mut hasher = Sha256::new();
    for record in records {
      hasher.update(record.time.to_string().as_bytes());
    }
    format!("{:x}.json", hasher.finalize())
  }

  /// Split time-ordered `records` into batches of `points_per_file`.
  ///
  /// A batch whose name repeats an earlier one (same member times) is folded
  /// into the batch before it, so no two batches share a file.
  pub fn batches(records: &[PointRecord], points_per_file: usize) -> Vec<&[PointRecord]> {
    let size = points_per_file.max(1);
    let mut bounds: Vec<(usize, usize)> = Vec::new();
    let mut names: Vec<String> = Vec::new();

    let mut start = 0;
    while start < records.len() {
      let end = (start + size).min(records.len());
      let mut batch = (start, end);
      let mut name = Self::shard_name(&records[start..end]);
      while names.contains(&name) {
        let Some((prev_start, _)) = bounds.pop() else {
          break;
        };
        names.pop();
        batch = (prev_start, batch.1);
        name = Self::shard_name(&records[batch.0..batch.1]);
        warn!(points = batch.1 - batch.0, "shard name collision, folding batch into the previous one");
      }
      bounds.push(batch);
      names.push(name);
      start = end;
    }

    bounds.into_iter().map(|(start, end)| &records[start..end]).collect()
  }

  /// Write one batch and return its file name.
  ///
  /// An existing file with the same name is kept as is unless `force_rewrite`
  /// is set.
  pub async fn write(
    &self,
    records: &[PointRecord],
    codec: Codec,
    force_rewrite: bool,
  ) -> Result<String> {
    let file = Self::shard_name(records);
    let path = self.dir.join(&file);

    if !force_rewrite && tokio::fs::try_exists(&path).await.unwrap_or(false) {
      debug!(%file, "shard unchanged");
      return Ok(file);
    }

    let body = serde_json::to_vec(&codec.encode(records)).map_err(|source| StoreError::Encode {
      file: file.clone(),
      source,
    })?;
    tokio::fs::write(&path, body)
      .await
      .map_err(|source| StoreError::Write {
        file: file.clone(),
        source,
      })?;

    info!(%file, points = records.len(), %codec, "saved shard");
    Ok(file)
  }

  /// Read and decode every shard, with at most `concurrency` files in flight.
  ///
  /// Shards come back sorted by file name. Any unreadable shard fails the load.
  pub async fn load_all(&self, concurrency: usize) -> Result<Vec<LoadedShard>> {
    let started = Instant::now();
    let files: Vec<String> = self
      .list_files()
      .await?
      .into_iter()
      .filter(|file| file.ends_with(".json"))
      .collect();

    let dir = self.dir.clone();
    let jobs = files.into_iter().map(|file| load_file(dir.join(&file), file));
    let mut shards = run_bounded(jobs, concurrency).await?;
    for shard in &shards {
      debug!(file = %shard.file, codec = %shard.codec, points = shard.records.len(), "loaded shard");
    }
    shards.sort_by(|a, b| a.file.cmp(&b.file));

    info!(
      shards = shards.len(),
      points = shards.iter().map(|s| s.records.len()).sum::<usize>(),
      elapsed = ?started.elapsed(),
      "loaded data directory"
    );
    Ok(shards)
  }

  /// Delete every file not written in the current save pass.
  ///
  /// Returns the number of files removed. Stops at the first failure.
  pub async fn reconcile(&self, written: &HashSet<String>) -> Result<usize> {
    let mut removed = 0;
    for file in self.list_files().await? {
      if written.contains(&file) {
        continue;
      }
      let path = self.dir.join(&file);
      match tokio::fs::remove_file(&path).await {
        Ok(()) => {
          info!(%file, "removed stale shard");
          removed += 1;
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
          warn!(%file, "stale shard already gone");
        }
        Err(source) => return Err(StoreError::Remove { file, source }),
      }
    }
    Ok(removed)
  }

  /// Names of the regular files in the directory.
  async fn list_files(&self) -> Result<Vec<String>> {
    let list_err = |source| StoreError::ListDir {
      path: self.dir.clone(),
      source,
    };

    let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(list_err)?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(list_err)? {
      let is_file = entry
        .file_type()
        .await
        .map(|t| t.is_file())
        .unwrap_or(false);
      if is_file {
        files.push(entry.file_name().to_string_lossy().into_owned());
      }
    }
    Ok(files)
  }
}

/// Run `jobs` with at most `limit` of them in flight.
///
/// Results come back in completion order. The first failure drops the
/// remaining jobs.
async fn run_bounded<I, F, T>(jobs: I, limit: usize) -> Result<Vec<T>>
where
  I: IntoIterator<Item = F>,
  F: Future<Output = Result<T>> + Send + 'static,
  T: Send + 'static,
{
  let permits = Arc::new(Semaphore::new(limit.max(1)));
  let mut running = JoinSet::new();
  for job in jobs {
    let permits = Arc::clone(&permits);
    running.spawn(async move {
      // The semaphore is never closed
      let _permit = permits.acquire_owned().await.ok();
      job.await
    });
  }

  let mut results = Vec::new();
  while let Some(joined) = running.join_next().await {
    results.push(joined??);
  }
  Ok(results)
}

async fn load_file(path: PathBuf, file: String) -> Result<LoadedShard> {
  let body = tokio::fs::read(&path)
    .await
    .map_err(|source| StoreError::Read {
      file: file.clone(),
      source,
    })?;
  let value: serde_json::Value =
    serde_json::from_slice(&body).map_err(|source| StoreError::Decode {
      file: file.clone(),
      source,
    })?;
  let document = ShardDocument::from_value(value, &file)?;
  let codec = document.codec();
  let records = document.decode(&file);
  Ok(LoadedShard {
    file,
    codec,
    records,
  })
}
