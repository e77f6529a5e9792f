use anyhow::Context;
use mcwatch_monitor::console::{self, Command};
use mcwatch_monitor::{Config, JavaStatusClient, Poller, StatusFetcher};
use mcwatch_store::PointManager;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

const SUMMARY_TOP: usize = 5;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing for structured logging
    #[cfg(debug_assertions)]
    let log_level = tracing::Level::DEBUG;
    #[cfg(not(debug_assertions))]
    let log_level = tracing::Level::INFO;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_ascii_lowercase()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
    tracing::info!("Starting mcwatch...");

    // Load configuration from environment variables or use defaults
    let config = Config::from_env();
    config.validate().context("invalid configuration")?;
    tracing::info!(
        "Configuration: addr={}, check_inv={}s, time_out={}s, retry_times={}, data_dir={}, save={} ({}), full_players={}",
        config.addr,
        config.check_inv,
        config.time_out,
        config.retry_times,
        config.data_dir,
        config.enable_data_save,
        config.data_save_fmt,
        config.enable_full_players
    );

    let manager = PointManager::open(config.store_options()?)
        .await
        .context("failed to open data directory")?;
    manager.load().await.context("failed to load data")?;
    log_lines(console::top_players(&manager, SUMMARY_TOP).await);

    let (host, port) = config.server_addr()?;
    let client = JavaStatusClient::new(host, port, config.fetch_options().time_out);
    tracing::info!("Monitoring {}", client.addr());
    let fetcher = StatusFetcher::new(client, config.fetch_options());
    let poller = Poller::new(fetcher, manager.clone(), config.check_interval());
    let handle = poller.handle();

    let mut progress = poller.subscribe_progress();
    tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let current = *progress.borrow_and_update();
            tracing::debug!(?current, "progress");
        }
    });

    let poller_task = tokio::spawn(poller.run());

    // Commands from stdin until quit or ctrl-c
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    tracing::info!("{}", console::HELP);
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for ctrl-c")?;
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    // stdin closed, keep polling until ctrl-c
                    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<Command>() {
                    Ok(Command::Quit) => break,
                    Ok(command) => log_lines(console::execute(command, &handle, &manager).await),
                    Err(e) => tracing::warn!("{e}; {}", console::HELP),
                }
            }
        }
    }

    tracing::info!("Shutting down...");
    handle.stop();
    poller_task.await.context("poller task failed")?;

    if let Err(e) = manager.save().await {
        tracing::error!("Final save failed: {e}");
    }
    log_lines(console::top_players(&manager, SUMMARY_TOP).await);
    tracing::info!("Goodbye!");
    Ok(())
}

fn log_lines(lines: Vec<String>) {
    for line in lines {
        tracing::info!("{line}");
    }
}
