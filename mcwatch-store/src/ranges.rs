//! Online range reconstruction.
//!
//! One pass over time-ordered snapshots. A player joins at the first snapshot
//! that lists them and leaves at the first snapshot that no longer does. The
//! final snapshot closes every range still open, so there is no "still online"
//! state in the output.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::models::{OnlineRange, Snapshot};

/// Ranges of every player seen in `points`, keyed by name.
pub fn all_online_ranges<'a, I>(points: I) -> BTreeMap<String, Vec<OnlineRange>>
where
  I: IntoIterator<Item = &'a Snapshot>,
{
  let mut ranges: BTreeMap<String, Vec<OnlineRange>> = BTreeMap::new();
  let mut joined_at: HashMap<&'a str, f64> = HashMap::new();
  let mut last_players: HashSet<&'a str> = HashSet::new();
  let mut last_time = None;

  for point in points {
    let now_players: HashSet<&'a str> = point.players.iter().map(|p| p.name.as_str()).collect();

    for name in now_players.difference(&last_players) {
      joined_at.insert(*name, point.time);
    }
    for name in last_players.difference(&now_players) {
      if let Some(start) = joined_at.remove(name) {
        ranges
          .entry(name.to_string())
          .or_default()
          .push(OnlineRange::new(start, point.time));
      }
    }

    last_players = now_players;
    last_time = Some(point.time);
  }

  if let Some(end) = last_time {
    for (name, start) in joined_at {
      ranges
        .entry(name.to_string())
        .or_default()
        .push(OnlineRange::new(start, end));
    }
  }

  ranges
}

/// Ranges of a single player.
pub fn online_ranges<'a, I>(points: I, player: &str) -> Vec<OnlineRange>
where
  I: IntoIterator<Item = &'a Snapshot>,
{
  let mut ranges = Vec::new();
  let mut joined_at = None;
  let mut last_time = None;

  for point in points {
    let present = point.players.iter().any(|p| p.name == player);
    match (present, joined_at) {
      (true, None) => joined_at = Some(point.time),
      (false, Some(start)) => {
        ranges.push(OnlineRange::new(start, point.time));
        joined_at = None;
      }
      _ => {}
    }
    last_time = Some(point.time);
  }

  if let (Some(start), Some(end)) = (joined_at, last_time) {
    ranges.push(OnlineRange::new(start, end));
  }
  ranges
}

/// Smooth out connection flicker.
///
/// Consecutive ranges separated by less than `min_online_time` are merged, then
/// any range shorter than `min_online_time` is dropped.
pub fn merge_ranges(ranges: &[OnlineRange], min_online_time: f64) -> Vec<OnlineRange> {
  let mut merged: Vec<OnlineRange> = Vec::with_capacity(ranges.len());
  for range in ranges {
    match merged.last_mut() {
      Some(current) if range.start - current.end < min_online_time => {
        current.end = current.end.max(range.end);
      }
      _ => merged.push(*range),
    }
  }
  merged.retain(|range| range.duration() >= min_online_time);
  merged
}
