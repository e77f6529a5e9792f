//! Shard encodings.
//!
//! Three interchangeable layouts for a batch of point records:
//!
//! - `Normal`: the record list as a bare JSON array.
//! - `PlayerListMapping`: each record's player list becomes a hash, and a side
//!   table maps every distinct hash to its player list once.
//! - `PlayerMapping`: each record's player list becomes a hash, the hash maps to
//!   an ordered list of names, and each name maps to its player record once.
//!
//! The codec of a shard is stored in the shard itself (`fmt`), so shards written
//! under different codecs can be loaded side by side.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::{Result, StoreError};
use crate::models::{Player, PointRecord};

/// On-disk shard encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Codec {
  #[default]
  Normal,
  PlayerListMapping,
  PlayerMapping,
}

impl Codec {
  pub const ALL: [Codec; 3] = [Codec::Normal, Codec::PlayerListMapping, Codec::PlayerMapping];

  /// Stable `fmt` tag. `Normal` shards carry no tag on disk.
  pub fn tag(self) -> i64 {
    match self {
      Codec::Normal => 0,
      Codec::PlayerListMapping => 2,
      Codec::PlayerMapping => 3,
    }
  }

  pub fn from_tag(tag: i64) -> Option<Self> {
    Self::ALL.into_iter().find(|codec| codec.tag() == tag)
  }

  pub fn name(self) -> &'static str {
    match self {
      Codec::Normal => "normal",
      Codec::PlayerListMapping => "player_list_mapping",
      Codec::PlayerMapping => "player_mapping",
    }
  }

  /// Encode a batch of records into a shard document.
  pub fn encode(self, records: &[PointRecord]) -> ShardDocument {
    match self {
      Codec::Normal => ShardDocument::Normal(records.to_vec()),
      Codec::PlayerListMapping => {
        let mut players_mapping = BTreeMap::new();
        let points = records
          .iter()
          .map(|record| {
            let hash = players_hash(&record.players);
            players_mapping
              .entry(hash.clone())
              .or_insert_with(|| record.players.clone());
            MappedRecord::new(record, hash)
          })
          .collect();
        ShardDocument::PlayerListMapping(PlayerListShard {
          fmt: self.tag(),
          points,
          players_mapping,
        })
      }
      Codec::PlayerMapping => {
        let mut player_list_mapping = BTreeMap::new();
        let mut players_mapping = BTreeMap::new();
        let points = records
          .iter()
          .map(|record| {
            let hash = players_hash(&record.players);
            player_list_mapping.entry(hash.clone()).or_insert_with(|| {
              record
                .players
                .iter()
                .map(|p| p.name.clone())
                .collect::<Vec<_>>()
            });
            for player in &record.players {
              players_mapping
                .entry(player.name.clone())
                .or_insert_with(|| player.clone());
            }
            MappedRecord::new(record, hash)
          })
          .collect();
        ShardDocument::PlayerMapping(PlayerShard {
          fmt: self.tag(),
          points,
          player_list_mapping,
          players_mapping,
        })
      }
    }
  }
}

impl fmt::Display for Codec {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

#[derive(Debug, thiserror::Error, PartialEq)]
#[error("unknown shard format '{0}' (expected normal, player_list_mapping or player_mapping)")]
pub struct ParseCodecError(pub String);

impl FromStr for Codec {
  type Err = ParseCodecError;

  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    let s = s.trim();
    if let Ok(tag) = s.parse::<i64>() {
      return Codec::from_tag(tag).ok_or_else(|| ParseCodecError(s.to_string()));
    }
    Codec::ALL
      .into_iter()
      .find(|codec| codec.name().eq_ignore_ascii_case(s))
      .ok_or_else(|| ParseCodecError(s.to_string()))
  }
}

/// Hash of a player list: SHA-256 over name/uuid pairs in list order.
pub fn players_hash(players: &[Player]) -> String {
  let mut hasher = Sha256::new();
  for player in players {
    hasher.update(player.name.as_bytes());
    hasher.update([0]);
    hasher.update(player.uuid.as_bytes());
    hasher.update([0]);
  }
  format!("{:x}", hasher.finalize())
}

/// A point whose player list was replaced by its hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappedRecord {
  pub time: f64,
  pub online: u32,
  pub players: String,
  #[serde(default, skip_serializing_if = "is_zero")]
  pub ping: f64,
}

fn is_zero(value: &f64) -> bool {
  *value == 0.0
}

impl MappedRecord {
  fn new(record: &PointRecord, hash: String) -> Self {
    Self {
      time: record.time,
      online: record.online,
      players: hash,
      ping: record.ping,
    }
  }

  fn into_record(self, players: Vec<Player>) -> PointRecord {
    PointRecord {
      time: self.time,
      online: self.online,
      players,
      ping: self.ping,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerListShard {
  pub fmt: i64,
  pub points: Vec<MappedRecord>,
  pub players_mapping: BTreeMap<String, Vec<Player>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerShard {
  pub fmt: i64,
  pub points: Vec<MappedRecord>,
  pub player_list_mapping: BTreeMap<String, Vec<String>>,
  pub players_mapping: BTreeMap<String, Player>,
}

/// Object-shaped shard written before format tags existed.
#[derive(Debug, Deserialize)]
struct UntaggedShard {
  points: Vec<PointRecord>,
}

/// A serializable shard in one of the three layouts.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ShardDocument {
  Normal(Vec<PointRecord>),
  PlayerListMapping(PlayerListShard),
  PlayerMapping(PlayerShard),
}

impl ShardDocument {
  pub fn codec(&self) -> Codec {
    match self {
      ShardDocument::Normal(_) => Codec::Normal,
      ShardDocument::PlayerListMapping(_) => Codec::PlayerListMapping,
      ShardDocument::PlayerMapping(_) => Codec::PlayerMapping,
    }
  }

  /// Detect the layout of a parsed shard.
  ///
  /// A bare list, or an object without `fmt`, is `Normal`.
  pub fn from_value(value: Value, file: &str) -> Result<Self> {
    let decode_err = |source| StoreError::Decode {
      file: file.to_string(),
      source,
    };

    let fmt = match &value {
      Value::Object(map) => map.get("fmt").cloned(),
      _ => None,
    };

    match fmt {
      None if value.is_object() => {
        let shard: UntaggedShard = serde_json::from_value(value).map_err(decode_err)?;
        Ok(ShardDocument::Normal(shard.points))
      }
      None => Ok(ShardDocument::Normal(
        serde_json::from_value(value).map_err(decode_err)?,
      )),
      Some(fmt) => {
        let tag = fmt.as_i64().unwrap_or(-1);
        match Codec::from_tag(tag) {
          Some(Codec::Normal) => {
            let shard: UntaggedShard = serde_json::from_value(value).map_err(decode_err)?;
            Ok(ShardDocument::Normal(shard.points))
          }
          Some(Codec::PlayerListMapping) => Ok(ShardDocument::PlayerListMapping(
            serde_json::from_value(value).map_err(decode_err)?,
          )),
          Some(Codec::PlayerMapping) => Ok(ShardDocument::PlayerMapping(
            serde_json::from_value(value).map_err(decode_err)?,
          )),
          None => Err(StoreError::UnknownFormat {
            file: file.to_string(),
            fmt: tag,
          }),
        }
      }
    }
  }

  /// Rebuild the point records.
  ///
  /// Missing mapping entries degrade to an empty player list (or a bare player
  /// for a missing name) with a warning rather than failing the shard.
  pub fn decode(self, file: &str) -> Vec<PointRecord> {
    match self {
      ShardDocument::Normal(records) => records,
      ShardDocument::PlayerListMapping(shard) => {
        let PlayerListShard {
          points,
          players_mapping,
          ..
        } = shard;
        points
          .into_iter()
          .map(|point| {
            let players = match players_mapping.get(&point.players) {
              Some(players) => players.clone(),
              None => {
                warn!(file, hash = %point.players, "player list mapping entry missing");
                Vec::new()
              }
            };
            point.into_record(players)
          })
          .collect()
      }
      ShardDocument::PlayerMapping(shard) => {
        let PlayerShard {
          points,
          player_list_mapping,
          players_mapping,
          ..
        } = shard;
        points
          .into_iter()
          .map(|point| {
            let players = match player_list_mapping.get(&point.players) {
              Some(names) => names
                .iter()
                .map(|name| match players_mapping.get(name) {
                  Some(player) => player.clone(),
                  None => {
                    warn!(file, player = %name, "player mapping entry missing");
                    Player::named(name.clone())
                  }
                })
                .collect(),
              None => {
                warn!(file, hash = %point.players, "player list mapping entry missing");
                Vec::new()
              }
            };
            point.into_record(players)
          })
          .collect()
      }
    }
  }
}
