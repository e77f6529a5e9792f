//! Line commands read from stdin while the monitor runs.

use std::str::FromStr;

use mcwatch_store::analytics::rank_by_total;
use mcwatch_store::{Codec, PointManager};
use thiserror::Error;

use crate::helpers::format_duration;
use crate::poller::PollerHandle;

const DEFAULT_TOP: usize = 10;
const HOURS_BAR_WIDTH: usize = 30;
const SECS_PER_HOUR: f64 = 3600.0;

pub const HELP: &str = "commands: pause | resume | now | save | format <normal|player_list_mapping|player_mapping> | top [n] | hours <player> | status | quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Pause,
    Resume,
    /// Fetch immediately
    Now,
    Save,
    /// Switch the shard encoding; the next save rewrites every shard
    Format(Codec),
    /// Players ranked by total online time
    Top(usize),
    /// Average online hours of one player per UTC hour of the day
    Hours(String),
    Status,
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq)]
pub enum ParseCommandError {
    #[error("empty command")]
    Empty,

    #[error("unknown command {0:?}")]
    Unknown(String),

    #[error("invalid argument {0:?}")]
    Argument(String),
}

impl FromStr for Command {
    type Err = ParseCommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let name = words.next().ok_or(ParseCommandError::Empty)?;
        let arg = words.next();

        let command = match (name.to_ascii_lowercase().as_str(), arg) {
            ("pause", None) => Command::Pause,
            ("resume", None) => Command::Resume,
            ("now", None) => Command::Now,
            ("save", None) => Command::Save,
            ("format", Some(fmt)) => Command::Format(
                fmt.parse()
                    .map_err(|_| ParseCommandError::Argument(fmt.to_string()))?,
            ),
            ("top", None) => Command::Top(DEFAULT_TOP),
            ("top", Some(n)) => Command::Top(
                n.parse()
                    .map_err(|_| ParseCommandError::Argument(n.to_string()))?,
            ),
            ("hours", Some(player)) => Command::Hours(player.to_string()),
            ("status", None) => Command::Status,
            ("help" | "?", None) => Command::Help,
            ("quit" | "exit", None) => Command::Quit,
            _ => return Err(ParseCommandError::Unknown(line.trim().to_string())),
        };
        if words.next().is_some() {
            return Err(ParseCommandError::Unknown(line.trim().to_string()));
        }
        Ok(command)
    }
}

/// Run one command and return the lines to show. `Quit` is left to the caller.
pub async fn execute(command: Command, handle: &PollerHandle, manager: &PointManager) -> Vec<String> {
    match command {
        Command::Pause => {
            handle.pause();
            vec!["polling paused".to_string()]
        }
        Command::Resume => {
            handle.resume();
            vec!["polling resumed".to_string()]
        }
        Command::Now => {
            handle.fetch_now();
            vec!["fetching now".to_string()]
        }
        Command::Save => match manager.save().await {
            Ok(()) => vec![format!("saved {} points", manager.len().await)],
            Err(e) => vec![format!("save failed: {e}")],
        },
        Command::Format(codec) => {
            manager.set_codec(codec).await;
            vec![format!("shard format set to {codec}, applied on next save")]
        }
        Command::Top(n) => top_players(manager, n).await,
        Command::Hours(player) => hourly_activity(manager, &player).await,
        Command::Status => status_lines(handle, manager).await,
        Command::Help => vec![HELP.to_string()],
        Command::Quit => Vec::new(),
    }
}

/// One line per player, longest total online time first.
pub async fn top_players(manager: &PointManager, n: usize) -> Vec<String> {
    let infos = manager.player_infos(None).await;
    if infos.is_empty() {
        return vec!["no player activity recorded".to_string()];
    }
    rank_by_total(&infos)
        .into_iter()
        .take(n)
        .enumerate()
        .map(|(rank, info)| {
            format!(
                "{:>3}. {:<16} {:>9}  {} sessions, longest {}",
                rank + 1,
                info.name,
                format_duration(info.total_online_time),
                info.sessions(),
                format_duration(info.max_online_per_session),
            )
        })
        .collect()
}

/// Hour-of-day histogram for one player, one line per active hour.
pub async fn hourly_activity(manager: &PointManager, player: &str) -> Vec<String> {
    let hours = manager.hourly_activity(player).await;
    let peak = hours.iter().copied().fold(0.0, f64::max);
    if peak == 0.0 {
        return vec![format!("no activity recorded for {player}")];
    }

    let mut lines = vec![format!("{player}, average online per active day (UTC):")];
    for (hour, share) in hours.iter().enumerate().filter(|(_, share)| **share > 0.0) {
        let bar = "#".repeat(((share / peak) * HOURS_BAR_WIDTH as f64).ceil() as usize);
        lines.push(format!(
            "  {hour:02}:00 {:>9}  {bar}",
            format_duration(share * SECS_PER_HOUR)
        ));
    }
    lines
}

async fn status_lines(handle: &PollerHandle, manager: &PointManager) -> Vec<String> {
    let state = if handle.is_paused() { "paused" } else { "running" };
    let mut lines = vec![format!(
        "polling {state}, {} points, shard format {}",
        manager.len().await,
        manager.codec().await
    )];
    if let Some(latest) = manager.latest().await {
        let names: Vec<&str> = latest.players.iter().map(|p| p.name.as_str()).collect();
        lines.push(format!(
            "last snapshot: {} online, ping {:.1} ms, players: {}",
            latest.online,
            latest.ping,
            if names.is_empty() { "-".to_string() } else { names.join(", ") }
        ));
    }
    lines
}

#[cfg(test)]
mod tests {
    use mcwatch_store::{Player, Snapshot, StoreOptions};

    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!("pause".parse(), Ok(Command::Pause));
        assert_eq!("  Resume ".parse(), Ok(Command::Resume));
        assert_eq!("now".parse(), Ok(Command::Now));
        assert_eq!("top".parse(), Ok(Command::Top(DEFAULT_TOP)));
        assert_eq!("top 3".parse(), Ok(Command::Top(3)));
        assert_eq!("format player_mapping".parse(), Ok(Command::Format(Codec::PlayerMapping)));
        assert_eq!("format 2".parse(), Ok(Command::Format(Codec::PlayerListMapping)));
        assert_eq!("hours Steve".parse(), Ok(Command::Hours("Steve".to_string())));
        assert_eq!("exit".parse(), Ok(Command::Quit));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("".parse::<Command>(), Err(ParseCommandError::Empty));
        assert_eq!(
            "jump".parse::<Command>(),
            Err(ParseCommandError::Unknown("jump".to_string()))
        );
        assert_eq!(
            "top many".parse::<Command>(),
            Err(ParseCommandError::Argument("many".to_string()))
        );
        assert_eq!(
            "format zip".parse::<Command>(),
            Err(ParseCommandError::Argument("zip".to_string()))
        );
        assert!("pause now".parse::<Command>().is_err());
        assert_eq!(
            "hours".parse::<Command>(),
            Err(ParseCommandError::Unknown("hours".to_string()))
        );
    }

    #[tokio::test]
    async fn test_hourly_activity_lines() {
        let dir = tempfile::tempdir().unwrap();
        let manager = PointManager::open(StoreOptions {
            data_dir: dir.path().to_path_buf(),
            min_online_time: 0.0,
            ..StoreOptions::default()
        })
        .await
        .unwrap();

        // 02:00 to 02:45 UTC
        let steve = vec![Player::named("Steve")];
        manager.add(Snapshot::new(7200.0, 1, steve.clone(), 0.0)).await.unwrap();
        manager.add(Snapshot::new(7400.0, 1, steve, 0.0)).await.unwrap();
        manager.add(Snapshot::new(9900.0, 0, Vec::new(), 0.0)).await.unwrap();

        let lines = hourly_activity(&manager, "Steve").await;
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("  02:00"));
        assert!(lines[1].contains(&format_duration(2700.0)));

        assert_eq!(
            hourly_activity(&manager, "Alex").await,
            vec!["no activity recorded for Alex".to_string()]
        );
    }
}
