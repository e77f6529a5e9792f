use std::env::var;
use std::path::PathBuf;
use std::time::Duration;

use dotenvy::dotenv;
use mcwatch_store::{Codec, StoreOptions};

use crate::error::ConfigError;
use crate::status::fetcher::FetchOptions;

/// Default port of a Java edition server.
pub const DEFAULT_PORT: u16 = 25565;

/// Monitor configuration with environment variable overrides
#[derive(Debug, Clone)]
pub struct Config {
    /// Server address, `host` or `host:port`
    /// Env: MCWATCH_ADDR (default: "127.0.0.1:25565")
    pub addr: String,

    /// Seconds between two status fetches
    /// Env: MCWATCH_CHECK_INV (default: 60)
    pub check_inv: f64,

    /// Timeout of one status query in seconds
    /// Env: MCWATCH_TIME_OUT (default: 5)
    pub time_out: f64,

    /// Query attempts per fetch
    /// Env: MCWATCH_RETRY_TIMES (default: 3)
    pub retry_times: u32,

    /// Env: MCWATCH_POINTS_PER_FILE (default: 1200)
    pub points_per_file: usize,

    /// Env: MCWATCH_SAVED_PER_POINTS (default: 10)
    pub saved_per_points: usize,

    /// Gap in seconds above which a filler snapshot is inserted
    /// Env: MCWATCH_FIX_SEP (default: 300)
    pub fix_sep: f64,

    /// Online ranges and gaps shorter than this are noise
    /// Env: MCWATCH_MIN_ONLINE_TIME (default: 60)
    pub min_online_time: f64,

    /// Env: MCWATCH_DATA_DIR (default: "./data")
    pub data_dir: String,

    /// Env: MCWATCH_DATA_LOAD_THREADS (default: 8)
    pub data_load_threads: usize,

    /// Env: MCWATCH_ENABLE_DATA_SAVE (default: true)
    pub enable_data_save: bool,

    /// Shard encoding: normal, player_list_mapping, player_mapping or a numeric tag
    /// Env: MCWATCH_DATA_SAVE_FMT (default: "normal")
    pub data_save_fmt: String,

    /// Re-query until the full player list is known when the server only
    /// returns a sample
    /// Env: MCWATCH_ENABLE_FULL_PLAYERS (default: false)
    pub enable_full_players: bool,

    /// Env: MCWATCH_FP_RE_STATUS_INV (default: 1.0)
    pub fp_re_status_inv: f64,

    /// Env: MCWATCH_FP_MAX_TRY (default: 20)
    pub fp_max_try: u32,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let _ = dotenv();
        let defaults = Self::default();
        Self {
            addr: env_or_default_string("MCWATCH_ADDR", &defaults.addr),
            check_inv: env_or_default("MCWATCH_CHECK_INV", defaults.check_inv),
            time_out: env_or_default("MCWATCH_TIME_OUT", defaults.time_out),
            retry_times: env_or_default("MCWATCH_RETRY_TIMES", defaults.retry_times),
            points_per_file: env_or_default("MCWATCH_POINTS_PER_FILE", defaults.points_per_file),
            saved_per_points: env_or_default("MCWATCH_SAVED_PER_POINTS", defaults.saved_per_points),
            fix_sep: env_or_default("MCWATCH_FIX_SEP", defaults.fix_sep),
            min_online_time: env_or_default("MCWATCH_MIN_ONLINE_TIME", defaults.min_online_time),
            data_dir: env_or_default_string("MCWATCH_DATA_DIR", &defaults.data_dir),
            data_load_threads: env_or_default("MCWATCH_DATA_LOAD_THREADS", defaults.data_load_threads),
            enable_data_save: env_or_default("MCWATCH_ENABLE_DATA_SAVE", defaults.enable_data_save),
            data_save_fmt: env_or_default_string("MCWATCH_DATA_SAVE_FMT", &defaults.data_save_fmt),
            enable_full_players: env_or_default(
                "MCWATCH_ENABLE_FULL_PLAYERS",
                defaults.enable_full_players,
            ),
            fp_re_status_inv: env_or_default("MCWATCH_FP_RE_STATUS_INV", defaults.fp_re_status_inv),
            fp_max_try: env_or_default("MCWATCH_FP_MAX_TRY", defaults.fp_max_try),
        }
    }

    /// Reject values the monitor cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let counts = [
            ("retry_times", self.retry_times as usize),
            ("points_per_file", self.points_per_file),
            ("saved_per_points", self.saved_per_points),
            ("data_load_threads", self.data_load_threads),
            ("fp_max_try", self.fp_max_try as usize),
        ];
        if let Some((name, _)) = counts.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Zero(*name));
        }

        let intervals = [
            ("check_inv", self.check_inv),
            ("time_out", self.time_out),
            ("fp_re_status_inv", self.fp_re_status_inv),
        ];
        if let Some((name, _)) = intervals
            .iter()
            .find(|(_, value)| !(value.is_finite() && *value > 0.0))
        {
            return Err(ConfigError::NonPositive(*name));
        }

        self.server_addr()?;
        self.codec()?;
        Ok(())
    }

    /// Host and port of the monitored server.
    pub fn server_addr(&self) -> Result<(String, u16), ConfigError> {
        parse_addr(&self.addr)
    }

    pub fn codec(&self) -> Result<Codec, ConfigError> {
        Ok(self.data_save_fmt.parse()?)
    }

    pub fn check_interval(&self) -> Duration {
        secs(self.check_inv)
    }

    pub fn store_options(&self) -> Result<StoreOptions, ConfigError> {
        Ok(StoreOptions {
            data_dir: PathBuf::from(&self.data_dir),
            points_per_file: self.points_per_file,
            saved_per_points: self.saved_per_points,
            fix_sep: self.fix_sep,
            min_online_time: self.min_online_time,
            data_load_threads: self.data_load_threads,
            enable_data_save: self.enable_data_save,
            codec: self.codec()?,
        })
    }

    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            retry_times: self.retry_times,
            time_out: secs(self.time_out),
            enable_full_players: self.enable_full_players,
            fp_re_status_inv: secs(self.fp_re_status_inv),
            fp_max_try: self.fp_max_try,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:25565".to_string(),
            check_inv: 60.0,
            time_out: 5.0,
            retry_times: 3,
            points_per_file: 1200,
            saved_per_points: 10,
            fix_sep: 300.0,
            min_online_time: 60.0,
            data_dir: "./data".to_string(),
            data_load_threads: 8,
            enable_data_save: true,
            data_save_fmt: "normal".to_string(),
            enable_full_players: false,
            fp_re_status_inv: 1.0,
            fp_max_try: 20,
        }
    }
}

/// Split `host[:port]`. Bracketed IPv6 literals are accepted.
pub fn parse_addr(addr: &str) -> Result<(String, u16), ConfigError> {
    let invalid = || ConfigError::Address(addr.to_string());
    let addr = addr.trim();

    let (host, port) = if let Some(rest) = addr.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
        match tail {
            "" => (host, None),
            _ => (host, Some(tail.strip_prefix(':').ok_or_else(invalid)?)),
        }
    } else {
        match addr.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') => (host, Some(port)),
            Some(_) => return Err(invalid()),
            None => (addr, None),
        }
    };

    if host.is_empty() {
        return Err(invalid());
    }
    let port = match port {
        Some(port) => port.parse().map_err(|_| invalid())?,
        None => DEFAULT_PORT,
    };
    Ok((host.to_string(), port))
}

/// Validated intervals are always representable
fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or_default()
}

/// Parse environment variable or return default value
fn env_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    var(key)
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(default)
}

/// Parse environment variable string or return default value
fn env_or_default_string(key: &str, default: &str) -> String {
    var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.addr, "127.0.0.1:25565");
        assert_eq!(config.check_interval(), Duration::from_secs(60));
        assert_eq!(config.points_per_file, 1200);
        assert_eq!(config.saved_per_points, 10);
        assert_eq!(config.fix_sep, 300.0);
        assert_eq!(config.min_online_time, 60.0);
        assert_eq!(config.data_dir, "./data");
        assert_eq!(config.data_load_threads, 8);
        assert!(config.enable_data_save);
        assert!(!config.enable_full_players);
        assert_eq!(config.fp_max_try, 20);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_validate_rejects_zero_counts() {
        let config = Config {
            retry_times: 0,
            ..Config::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::Zero("retry_times")));

        let config = Config {
            data_load_threads: 0,
            ..Config::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::Zero("data_load_threads")));
    }

    #[test]
    fn test_validate_rejects_bad_intervals() {
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let config = Config {
                time_out: bad,
                ..Config::default()
            };
            assert_eq!(config.validate(), Err(ConfigError::NonPositive("time_out")));
        }
    }

    #[test]
    fn test_save_format() {
        let config = Config {
            data_save_fmt: "Player_Mapping".to_string(),
            ..Config::default()
        };
        assert_eq!(config.codec(), Ok(Codec::PlayerMapping));
        assert_eq!(config.store_options().unwrap().codec, Codec::PlayerMapping);

        let config = Config {
            data_save_fmt: "2".to_string(),
            ..Config::default()
        };
        assert_eq!(config.codec(), Ok(Codec::PlayerListMapping));

        let config = Config {
            data_save_fmt: "zip".to_string(),
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::SaveFormat(_))));
    }

    #[test]
    fn test_parse_addr() {
        assert_eq!(parse_addr("mc.example.com"), Ok(("mc.example.com".to_string(), 25565)));
        assert_eq!(parse_addr("10.0.0.2:25570"), Ok(("10.0.0.2".to_string(), 25570)));
        assert_eq!(parse_addr("[::1]:25570"), Ok(("::1".to_string(), 25570)));
        assert_eq!(parse_addr("[::1]"), Ok(("::1".to_string(), 25565)));
        assert!(parse_addr("host:notaport").is_err());
        assert!(parse_addr(":25565").is_err());
        assert!(parse_addr("::1").is_err());
        assert!(parse_addr("").is_err());
    }
}
