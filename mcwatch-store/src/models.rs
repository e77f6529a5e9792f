use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Sentinel uuid for players the server did not identify.
pub const NIL_UUID: &str = "00000000-0000-0000-0000-000000000000";

fn nil_uuid() -> String {
  NIL_UUID.to_string()
}

/// A Minecraft player as reported in a status sample.
///
/// Two players are the same player when their names match, whatever their
/// uuid says. Presence is tracked by name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Player {
  pub name: String,
  #[serde(default = "nil_uuid")]
  pub uuid: String,
}

impl Player {
  pub fn new(name: impl Into<String>, uuid: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      uuid: uuid.into(),
    }
  }

  /// A player known only by name.
  pub fn named(name: impl Into<String>) -> Self {
    Self::new(name, NIL_UUID)
  }
}

impl PartialEq for Player {
  fn eq(&self, other: &Self) -> bool {
    self.name == other.name
  }
}

impl Eq for Player {}

impl Hash for Player {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.name.hash(state);
  }
}

/// Opaque snapshot identifier: 8 random bytes.
///
/// Ids are neither sortable nor monotonic. Snapshots are always ordered by time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PointId(u64);

impl PointId {
  pub fn random() -> Self {
    Self(rand::random())
  }
}

impl fmt::Display for PointId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:016x}", self.0)
  }
}

/// One timestamped presence sample.
#[derive(Debug, Clone)]
pub struct Snapshot {
  /// Unix seconds
  pub time: f64,
  /// Online count reported by the server (may exceed `players.len()`)
  pub online: u32,
  pub players: Vec<Player>,
  /// Round trip latency in milliseconds, 0 when not measured
  pub ping: f64,
  id: PointId,
}

impl Snapshot {
  pub fn new(time: f64, online: u32, players: Vec<Player>, ping: f64) -> Self {
    Self {
      time,
      online,
      players,
      ping,
      id: PointId::random(),
    }
  }

  pub fn id(&self) -> PointId {
    self.id
  }

  /// Same presence data at another time, under a fresh id.
  pub fn with_time(&self, time: f64) -> Self {
    Self::new(time, self.online, self.players.clone(), self.ping)
  }

  pub fn to_record(&self) -> PointRecord {
    PointRecord {
      time: self.time,
      online: self.online,
      players: self.players.clone(),
      ping: self.ping,
    }
  }

  pub fn from_record(record: PointRecord) -> Self {
    Self::new(record.time, record.online, record.players, record.ping)
  }
}

fn is_zero(value: &f64) -> bool {
  *value == 0.0
}

/// On-disk form of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointRecord {
  pub time: f64,
  pub online: u32,
  pub players: Vec<Player>,
  #[serde(default, skip_serializing_if = "is_zero")]
  pub ping: f64,
}

/// One contiguous presence span of a player.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OnlineRange {
  pub start: f64,
  pub end: f64,
}

impl OnlineRange {
  pub fn new(start: f64, end: f64) -> Self {
    Self { start, end }
  }

  pub fn duration(&self) -> f64 {
    self.end - self.start
  }
}

impl From<(f64, f64)> for OnlineRange {
  fn from((start, end): (f64, f64)) -> Self {
    Self::new(start, end)
  }
}
