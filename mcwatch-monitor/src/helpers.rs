use std::time::{SystemTime, UNIX_EPOCH};

use mcwatch_store::Player;

/// Current unix time in seconds.
pub fn now() -> f64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_secs_f64())
    .unwrap_or_default()
}

/// Human readable duration, e.g. `3h 04m`.
pub fn format_duration(secs: f64) -> String {
  let total = secs.max(0.0).round() as u64;
  let (hours, minutes, seconds) = (total / 3600, total / 60 % 60, total % 60);
  match (hours, minutes) {
    (0, 0) => format!("{seconds}s"),
    (0, _) => format!("{minutes}m {seconds:02}s"),
    _ => format!("{hours}h {minutes:02}m"),
  }
}

/// Append the players of `sample` not already in `players`, keeping order.
///
/// Returns how many were added.
pub fn merge_players(players: &mut Vec<Player>, sample: Vec<Player>) -> usize {
  let before = players.len();
  for player in sample {
    if !players.contains(&player) {
      players.push(player);
    }
  }
  players.len() - before
}
