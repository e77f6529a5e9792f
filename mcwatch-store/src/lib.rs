pub mod analytics;
pub mod codec;
mod error;
mod models;
pub mod ranges;
pub mod shard;

pub use analytics::{PlayerOnlineInfo, TimeWindow};
pub use codec::Codec;
pub use error::{Result, StoreError};
pub use models::{NIL_UUID, OnlineRange, Player, PointId, PointRecord, Snapshot};
pub use shard::ShardStore;

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// Knobs consumed by the point manager and the shard store.
#[derive(Debug, Clone)]
pub struct StoreOptions {
  /// Directory holding the shard files
  pub data_dir: PathBuf,
  /// Maximum snapshots per shard file
  pub points_per_file: usize,
  /// Added snapshots between automatic saves
  pub saved_per_points: usize,
  /// Gap (seconds) above which a filler snapshot is synthesized
  pub fix_sep: f64,
  /// Ranges and gaps shorter than this (seconds) are treated as noise
  pub min_online_time: f64,
  /// Shard files decoded concurrently on load
  pub data_load_threads: usize,
  /// When false, saving is a no-op
  pub enable_data_save: bool,
  /// Encoding for newly written shards
  pub codec: Codec,
}

impl Default for StoreOptions {
  fn default() -> Self {
    Self {
      data_dir: PathBuf::from("./data"),
      points_per_file: 1200,
      saved_per_points: 10,
      fix_sep: 300.0,
      min_online_time: 60.0,
      data_load_threads: 8,
      enable_data_save: true,
      codec: Codec::Normal,
    }
  }
}

/// Ordering key: time first, then insertion sequence.
#[derive(Debug, Clone, Copy)]
struct PointKey {
  time: f64,
  seq: u64,
}

impl PartialEq for PointKey {
  fn eq(&self, other: &Self) -> bool {
    self.cmp(other) == Ordering::Equal
  }
}

impl Eq for PointKey {}

impl PartialOrd for PointKey {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for PointKey {
  fn cmp(&self, other: &Self) -> Ordering {
    self
      .time
      .total_cmp(&other.time)
      .then(self.seq.cmp(&other.seq))
  }
}

/// Snapshots keyed by id, iterated in time order.
#[derive(Debug, Default)]
struct PointSet {
  by_time: BTreeMap<PointKey, Snapshot>,
  index: HashMap<PointId, PointKey>,
  next_seq: u64,
}

impl PointSet {
  fn insert(&mut self, point: Snapshot) {
    let key = PointKey {
      time: point.time,
      seq: self.next_seq,
    };
    self.next_seq += 1;
    if let Some(old) = self.index.insert(point.id(), key) {
      self.by_time.remove(&old);
    }
    self.by_time.insert(key, point);
  }

  fn remove(&mut self, id: PointId) -> Option<Snapshot> {
    let key = self.index.remove(&id)?;
    self.by_time.remove(&key)
  }

  fn get(&self, id: PointId) -> Option<&Snapshot> {
    self.index.get(&id).and_then(|key| self.by_time.get(key))
  }

  fn latest(&self) -> Option<&Snapshot> {
    self.by_time.values().next_back()
  }

  fn iter(&self) -> impl Iterator<Item = &Snapshot> {
    self.by_time.values()
  }

  fn len(&self) -> usize {
    self.by_time.len()
  }
}

struct State {
  points: PointSet,
  unsaved: usize,
  codec: Codec,
  /// Codec of the last successful save pass
  saved_codec: Codec,
}

/// Owner of the snapshot history.
///
/// All mutation and every analysis pass go through one lock, so a range scan
/// always sees a stable sequence.
#[derive(Clone)]
pub struct PointManager {
  store: ShardStore,
  options: Arc<StoreOptions>,
  state: Arc<Mutex<State>>,
}

impl PointManager {
  /// Open the data directory (created when missing). Nothing is loaded yet.
  pub async fn open(options: StoreOptions) -> Result<Self> {
    let store = ShardStore::open(&options.data_dir).await?;
    let state = State {
      points: PointSet::default(),
      unsaved: 0,
      codec: options.codec,
      saved_codec: options.codec,
    };
    Ok(Self {
      store,
      options: Arc::new(options),
      state: Arc::new(Mutex::new(state)),
    })
  }

  pub fn options(&self) -> &StoreOptions {
    &self.options
  }

  // ========================================================================
  // Points
  // ========================================================================

  /// Add a snapshot, repairing a monitoring gap first and saving every
  /// `saved_per_points` additions.
  ///
  /// An error means the automatic save failed; the snapshot itself was added.
  pub async fn add(&self, point: Snapshot) -> Result<()> {
    let mut state = self.state.lock().await;

    if let Some(latest) = state.points.latest() {
      let gap = point.time - latest.time;
      if gap > self.options.fix_sep {
        let filler = latest.with_time(latest.time + gap / 2.0);
        debug!(gap, filler_time = filler.time, "filling monitoring gap");
        state.points.insert(filler);
        state.unsaved += 1;
      }
    }

    state.points.insert(point);
    state.unsaved += 1;

    if state.unsaved >= self.options.saved_per_points {
      state.unsaved = 0;
      self.save_locked(&mut state).await?;
    }
    Ok(())
  }

  pub async fn get(&self, id: PointId) -> Option<Snapshot> {
    self.state.lock().await.points.get(id).cloned()
  }

  pub async fn remove(&self, id: PointId) -> Option<Snapshot> {
    let removed = self.state.lock().await.points.remove(id);
    if removed.is_some() {
      debug!(%id, "removed point");
    }
    removed
  }

  /// All snapshots in time order.
  pub async fn points(&self) -> Vec<Snapshot> {
    self.state.lock().await.points.iter().cloned().collect()
  }

  pub async fn latest(&self) -> Option<Snapshot> {
    self.state.lock().await.points.latest().cloned()
  }

  pub async fn len(&self) -> usize {
    self.state.lock().await.points.len()
  }

  pub async fn is_empty(&self) -> bool {
    self.len().await == 0
  }

  // ========================================================================
  // Persistence
  // ========================================================================

  /// Load every shard of the data directory.
  ///
  /// Snapshots with equal times keep the order (shard file name, position in
  /// shard), so the result does not depend on loader scheduling. Returns the
  /// number of snapshots loaded.
  pub async fn load(&self) -> Result<usize> {
    info!(dir = %self.store.dir().display(), "loading data");
    let mut state = self.state.lock().await;
    let shards = self.store.load_all(self.options.data_load_threads).await?;

    let mut records: Vec<PointRecord> = shards.into_iter().flat_map(|s| s.records).collect();
    records.sort_by(|a, b| a.time.total_cmp(&b.time));

    let loaded = records.len();
    for record in records {
      state.points.insert(Snapshot::from_record(record));
    }
    info!(points = loaded, total = state.points.len(), "data loaded");
    Ok(loaded)
  }

  /// Write every snapshot to shards and remove stale shard files.
  ///
  /// A no-op when saving is disabled. The error's message is meant to be shown
  /// as is.
  pub async fn save(&self) -> Result<()> {
    let mut state = self.state.lock().await;
    self.save_locked(&mut state).await
  }

  /// Switch the encoding of future saves. The next save rewrites every shard.
  pub async fn set_codec(&self, codec: Codec) {
    let mut state = self.state.lock().await;
    if state.codec != codec {
      info!(from = %state.codec, to = %codec, "shard format changed");
      state.codec = codec;
    }
  }

  pub async fn codec(&self) -> Codec {
    self.state.lock().await.codec
  }

  async fn save_locked(&self, state: &mut State) -> Result<()> {
    if !self.options.enable_data_save {
      info!("data saving disabled, skipping save");
      return Ok(());
    }

    let codec = state.codec;
    let force_rewrite = codec != state.saved_codec;
    info!(dir = %self.store.dir().display(), %codec, force_rewrite, "saving data");

    let records: Vec<PointRecord> = state.points.iter().map(Snapshot::to_record).collect();
    let mut written = HashSet::new();
    for batch in ShardStore::batches(&records, self.options.points_per_file) {
      let file = self
        .store
        .write(batch, codec, force_rewrite)
        .await
        .inspect_err(|e| error!(error = %e, "save aborted"))?;
      written.insert(file);
    }

    self
      .store
      .reconcile(&written)
      .await
      .inspect_err(|e| error!(error = %e, "save aborted"))?;

    state.saved_codec = codec;
    Ok(())
  }

  // ========================================================================
  // Analysis
  // ========================================================================

  /// Online ranges of every player.
  pub async fn all_online_ranges(&self) -> BTreeMap<String, Vec<OnlineRange>> {
    let state = self.state.lock().await;
    ranges::all_online_ranges(state.points.iter())
  }

  /// Online ranges of one player.
  pub async fn online_ranges(&self, player: &str) -> Vec<OnlineRange> {
    let state = self.state.lock().await;
    ranges::online_ranges(state.points.iter(), player)
  }

  /// Average online hours per active day for each UTC hour, over the
  /// player's merged ranges.
  pub async fn hourly_activity(&self, player: &str) -> [f64; 24] {
    let ranges = self.online_ranges(player).await;
    analytics::hourly_distribution(&ranges::merge_ranges(&ranges, self.options.min_online_time))
  }

  /// Per-player statistics over merged ranges.
  pub async fn player_infos(&self, window: Option<TimeWindow>) -> BTreeMap<String, PlayerOnlineInfo> {
    let state = self.state.lock().await;
    analytics::player_infos(state.points.iter(), self.options.min_online_time, window)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  use tempfile::TempDir;

  fn options(dir: &TempDir) -> StoreOptions {
    StoreOptions {
      data_dir: dir.path().to_path_buf(),
      points_per_file: 3,
      saved_per_points: 1000,
      ..StoreOptions::default()
    }
  }

  fn point(time: f64, names: &[&str]) -> Snapshot {
    let players: Vec<Player> = names.iter().map(|n| Player::named(*n)).collect();
    Snapshot::new(time, players.len() as u32, players, 15.0)
  }

  #[tokio::test]
  async fn test_open_creates_directory() {
    let dir = tempfile::tempdir().unwrap();
    let data_dir = dir.path().join("data");
    assert!(!data_dir.exists());
    PointManager::open(StoreOptions {
      data_dir: data_dir.clone(),
      ..options(&dir)
    })
    .await
    .unwrap();
    assert!(data_dir.is_dir());
  }

  #[tokio::test]
  async fn test_points_are_time_ordered() {
    let dir = tempfile::tempdir().unwrap();
    let manager = PointManager::open(options(&dir)).await.unwrap();

    manager.add(point(100.0, &["Steve"])).await.unwrap();
    manager.add(point(50.0, &[])).await.unwrap();
    manager.add(point(150.0, &["Alex"])).await.unwrap();

    let times: Vec<f64> = manager.points().await.iter().map(|p| p.time).collect();
    assert_eq!(times, vec![50.0, 100.0, 150.0]);
    assert_eq!(manager.latest().await.unwrap().time, 150.0);
  }

  #[tokio::test]
  async fn test_equal_times_keep_insertion_order() {
    let dir = tempfile::tempdir().unwrap();
    let manager = PointManager::open(options(&dir)).await.unwrap();

    manager.add(point(100.0, &["Steve"])).await.unwrap();
    manager.add(point(100.0, &["Alex"])).await.unwrap();

    let names: Vec<String> = manager
      .points()
      .await
      .iter()
      .map(|p| p.players[0].name.clone())
      .collect();
    assert_eq!(names, vec!["Steve", "Alex"]);
  }

  #[tokio::test]
  async fn test_get_and_remove() {
    let dir = tempfile::tempdir().unwrap();
    let manager = PointManager::open(options(&dir)).await.unwrap();

    let p = point(10.0, &["Steve"]);
    let id = p.id();
    manager.add(p).await.unwrap();

    assert_eq!(manager.get(id).await.unwrap().time, 10.0);
    assert!(manager.remove(id).await.is_some());
    assert!(manager.get(id).await.is_none());
    assert!(manager.remove(id).await.is_none());
    assert!(manager.is_empty().await);
  }

  #[tokio::test]
  async fn test_gap_repair_inserts_midpoint() {
    let dir = tempfile::tempdir().unwrap();
    let manager = PointManager::open(options(&dir)).await.unwrap();

    manager.add(point(1000.0, &["Steve", "Alex"])).await.unwrap();
    manager.add(point(2000.0, &["Alex"])).await.unwrap();

    let points = manager.points().await;
    assert_eq!(points.len(), 3);
    assert_eq!(points[1].time, 1500.0);
    assert_eq!(points[1].players, points[0].players);
    assert_eq!(points[1].online, 2);
    assert_eq!(points[2].time, 2000.0);
  }

  #[tokio::test]
  async fn test_no_gap_repair_within_threshold() {
    let dir = tempfile::tempdir().unwrap();
    let manager = PointManager::open(options(&dir)).await.unwrap();

    manager.add(point(1000.0, &["Steve"])).await.unwrap();
    manager.add(point(1300.0, &[])).await.unwrap();

    assert_eq!(manager.len().await, 2);
  }

  #[tokio::test]
  async fn test_auto_save_after_threshold() {
    let dir = tempfile::tempdir().unwrap();
    let manager = PointManager::open(StoreOptions {
      saved_per_points: 2,
      ..options(&dir)
    })
    .await
    .unwrap();

    manager.add(point(10.0, &[])).await.unwrap();
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

    manager.add(point(20.0, &[])).await.unwrap();
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
  }

  #[tokio::test]
  async fn test_save_disabled_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let manager = PointManager::open(StoreOptions {
      enable_data_save: false,
      ..options(&dir)
    })
    .await
    .unwrap();

    manager.add(point(10.0, &["Steve"])).await.unwrap();
    manager.save().await.unwrap();
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
  }

  #[tokio::test]
  async fn test_ranges_through_manager() {
    let dir = tempfile::tempdir().unwrap();
    let manager = PointManager::open(options(&dir)).await.unwrap();

    for (time, names) in [
      (0.0, vec!["A", "B"]),
      (10.0, vec!["B"]),
      (20.0, vec!["B", "C"]),
      (30.0, vec![]),
    ] {
      manager.add(point(time, &names)).await.unwrap();
    }

    let all = manager.all_online_ranges().await;
    assert_eq!(all["A"], vec![OnlineRange::new(0.0, 10.0)]);
    assert_eq!(all["B"], vec![OnlineRange::new(0.0, 30.0)]);
    assert_eq!(all["C"], vec![OnlineRange::new(20.0, 30.0)]);
    assert_eq!(manager.online_ranges("B").await, vec![OnlineRange::new(0.0, 30.0)]);
  }

  #[tokio::test]
  async fn test_equal_time_batches_survive_save() {
    let dir = tempfile::tempdir().unwrap();
    let manager = PointManager::open(StoreOptions {
      points_per_file: 1,
      ..options(&dir)
    })
    .await
    .unwrap();

    manager.add(point(100.0, &["A"])).await.unwrap();
    manager.add(point(100.0, &["B"])).await.unwrap();
    manager.add(point(200.0, &["C"])).await.unwrap();
    manager.save().await.unwrap();
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);

    let reloaded = PointManager::open(options(&dir)).await.unwrap();
    assert_eq!(reloaded.load().await.unwrap(), 3);
    let names: Vec<String> = reloaded
      .points()
      .await
      .iter()
      .map(|p| p.players[0].name.clone())
      .collect();
    assert_eq!(names, vec!["A", "B", "C"]);
  }

  #[tokio::test]
  async fn test_hourly_activity_uses_merged_ranges() {
    let dir = tempfile::tempdir().unwrap();
    let manager = PointManager::open(StoreOptions {
      min_online_time: 60.0,
      ..options(&dir)
    })
    .await
    .unwrap();

    // 01:00 to 01:30 UTC on day one, then a 10s blip that is dropped
    for (time, names) in [
      (3600.0, vec!["Steve"]),
      (5400.0, vec![]),
      (7200.0, vec!["Steve"]),
      (7210.0, vec![]),
    ] {
      manager.add(point(time, &names)).await.unwrap();
    }

    let hours = manager.hourly_activity("Steve").await;
    assert_eq!(hours[1], 0.5);
    assert_eq!(hours[2], 0.0);
    assert_eq!(hours.iter().sum::<f64>(), 0.5);
    assert_eq!(manager.hourly_activity("Alex").await, [0.0; 24]);
  }
}
