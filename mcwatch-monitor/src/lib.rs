pub mod config;
pub mod console;
mod error;
pub mod helpers;
pub mod poller;
pub mod status;

pub use config::Config;
pub use error::{ConfigError, StatusError};
pub use poller::{Poller, PollerHandle};
pub use status::{
    FetchOptions, FetchOutcome, FetchResult, JavaStatusClient, Progress, ServerStatus,
    StatusFetcher, StatusSource,
};
