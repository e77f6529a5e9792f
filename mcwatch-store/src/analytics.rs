//! Per-player statistics derived from online ranges.
//!
//! Day and hour buckets are UTC.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::models::{OnlineRange, Snapshot};
use crate::ranges::{all_online_ranges, merge_ranges};

const SECS_PER_HOUR: f64 = 3600.0;
const SECS_PER_DAY: f64 = 86400.0;

/// Inclusive time window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeWindow {
  pub from: f64,
  pub to: f64,
}

impl TimeWindow {
  pub fn new(from: f64, to: f64) -> Self {
    Self { from, to }
  }

  /// Part of `range` inside the window, if any.
  pub fn clip(&self, range: OnlineRange) -> Option<OnlineRange> {
    let start = range.start.max(self.from);
    let end = range.end.min(self.to);
    (start < end).then(|| OnlineRange::new(start, end))
  }
}

/// Aggregated online statistics of one player.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerOnlineInfo {
  pub name: String,
  /// Merged ranges the statistics are computed from
  pub ranges: Vec<OnlineRange>,
  pub total_online_time: f64,
  /// Online time inside the requested window (0 without a window)
  pub window_online_time: f64,
  pub avg_online_per_day: f64,
  pub avg_online_per_session: f64,
  pub max_online_per_session: f64,
  pub first_join: f64,
  pub last_leave: f64,
}

impl PlayerOnlineInfo {
  /// Statistics over already merged ranges. `None` when there are no ranges.
  pub fn from_ranges(
    name: impl Into<String>,
    ranges: Vec<OnlineRange>,
    window: Option<TimeWindow>,
  ) -> Option<Self> {
    let first = ranges.first()?.start;
    let last = ranges.last()?.end;

    let total: f64 = ranges.iter().map(OnlineRange::duration).sum();
    let days: HashSet<i64> = ranges.iter().map(|r| day_of(r.start)).collect();
    let max = ranges.iter().map(OnlineRange::duration).fold(0.0, f64::max);
    let window_time = window
      .map(|w| {
        ranges
          .iter()
          .filter_map(|r| w.clip(*r))
          .map(|r| r.duration())
          .sum()
      })
      .unwrap_or(0.0);

    Some(Self {
      name: name.into(),
      total_online_time: total,
      window_online_time: window_time,
      avg_online_per_day: total / days.len() as f64,
      avg_online_per_session: total / ranges.len() as f64,
      max_online_per_session: max,
      first_join: first,
      last_leave: last,
      ranges,
    })
  }

  pub fn sessions(&self) -> usize {
    self.ranges.len()
  }
}

/// Statistics for every player in `points`.
///
/// Ranges are merged with `min_online_time` first; players left with no range
/// are omitted.
pub fn player_infos<'a, I>(
  points: I,
  min_online_time: f64,
  window: Option<TimeWindow>,
) -> BTreeMap<String, PlayerOnlineInfo>
where
  I: IntoIterator<Item = &'a Snapshot>,
{
  all_online_ranges(points)
    .into_iter()
    .filter_map(|(name, ranges)| {
      let merged = merge_ranges(&ranges, min_online_time);
      PlayerOnlineInfo::from_ranges(name.clone(), merged, window).map(|info| (name, info))
    })
    .collect()
}

/// Players ordered by total online time, longest first.
pub fn rank_by_total(infos: &BTreeMap<String, PlayerOnlineInfo>) -> Vec<&PlayerOnlineInfo> {
  let mut ranked: Vec<_> = infos.values().collect();
  ranked.sort_by(|a, b| b.total_online_time.total_cmp(&a.total_online_time));
  ranked
}

/// Average online hours per active day, for each UTC hour of the day.
pub fn hourly_distribution(ranges: &[OnlineRange]) -> [f64; 24] {
  let mut buckets = [0.0; 24];
  let mut days = HashSet::new();

  for range in ranges {
    let mut cursor = range.start;
    while cursor < range.end {
      let hour_end = ((cursor / SECS_PER_HOUR).floor() + 1.0) * SECS_PER_HOUR;
      let slice_end = hour_end.min(range.end);
      let hour = ((cursor / SECS_PER_HOUR).floor() as i64).rem_euclid(24) as usize;
      buckets[hour] += slice_end - cursor;
      days.insert(day_of(cursor));
      cursor = slice_end;
    }
  }

  if days.is_empty() {
    return buckets;
  }
  let days = days.len() as f64;
  for bucket in &mut buckets {
    *bucket /= days * SECS_PER_HOUR;
  }
  buckets
}

fn day_of(time: f64) -> i64 {
  (time / SECS_PER_DAY).floor() as i64
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::models::Player;

  fn point(time: f64, names: &[&str]) -> Snapshot {
    let players: Vec<Player> = names.iter().map(|n| Player::named(*n)).collect();
    Snapshot::new(time, players.len() as u32, players, 0.0)
  }

  #[test]
  fn test_window_clip() {
    let window = TimeWindow::new(100.0, 200.0);
    assert_eq!(window.clip(OnlineRange::new(120.0, 150.0)), Some(OnlineRange::new(120.0, 150.0)));
    assert_eq!(window.clip(OnlineRange::new(50.0, 150.0)), Some(OnlineRange::new(100.0, 150.0)));
    assert_eq!(window.clip(OnlineRange::new(150.0, 250.0)), Some(OnlineRange::new(150.0, 200.0)));
    assert_eq!(window.clip(OnlineRange::new(0.0, 500.0)), Some(OnlineRange::new(100.0, 200.0)));
    assert_eq!(window.clip(OnlineRange::new(0.0, 50.0)), None);
  }

  #[test]
  fn test_player_infos() {
    let points = vec![
      point(0.0, &["Steve", "Alex"]),
      point(600.0, &["Steve"]),
      point(1200.0, &["Steve"]),
      point(1210.0, &[]),
      point(1215.0, &["Steve"]),
      point(1800.0, &[]),
    ];
    let infos = player_infos(&points, 60.0, Some(TimeWindow::new(0.0, 300.0)));

    let steve = &infos["Steve"];
    // (0,1210) and (1215,1800) merge across the 5s gap
    assert_eq!(steve.ranges, vec![OnlineRange::new(0.0, 1800.0)]);
    assert_eq!(steve.sessions(), 1);
    assert_eq!(steve.total_online_time, 1800.0);
    assert_eq!(steve.avg_online_per_day, 1800.0);
    assert_eq!(steve.max_online_per_session, 1800.0);
    assert_eq!(steve.window_online_time, 300.0);
    assert_eq!(steve.first_join, 0.0);
    assert_eq!(steve.last_leave, 1800.0);

    let alex = &infos["Alex"];
    assert_eq!(alex.total_online_time, 600.0);

    let ranked: Vec<&str> = rank_by_total(&infos).iter().map(|i| i.name.as_str()).collect();
    assert_eq!(ranked, vec!["Steve", "Alex"]);
  }

  #[test]
  fn test_blips_are_omitted() {
    let points = vec![point(0.0, &["Steve"]), point(5.0, &[]), point(1000.0, &[])];
    let infos = player_infos(&points, 60.0, None);
    assert!(infos.is_empty());
  }

  #[test]
  fn test_hourly_distribution_splits_hours() {
    // 00:30 to 02:15 on day zero
    let ranges = [OnlineRange::new(1800.0, 8100.0)];
    let hours = hourly_distribution(&ranges);
    assert_eq!(hours[0], 0.5);
    assert_eq!(hours[1], 1.0);
    assert_eq!(hours[2], 0.25);
    assert!(hours[3..].iter().all(|h| *h == 0.0));
  }

  #[test]
  fn test_hourly_distribution_averages_days() {
    let day = SECS_PER_DAY;
    let ranges = [
      OnlineRange::new(5.0 * SECS_PER_HOUR, 6.0 * SECS_PER_HOUR),
      OnlineRange::new(day + 5.0 * SECS_PER_HOUR, day + 5.5 * SECS_PER_HOUR),
    ];
    let hours = hourly_distribution(&ranges);
    assert_eq!(hours[5], 0.75);
    assert_eq!(hourly_distribution(&[]), [0.0; 24]);
  }
}
