use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use chat_bot::{
    cli::Cli,
    cycle::RequestCycle,
    listener::BroadcastListener,
    shutdown::wait_for_shutdown_signal,
    transport::{ZmqConnector, ZmqFeedConnector},
};

fn init_tracing(json: bool) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = if json {
        fmt().json().with_env_filter(filter).try_init()
    } else {
        fmt().with_env_filter(filter).with_target(false).try_init()
    };
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = cli.config()?;
    let identity = cli.identity();
    info!(
        user = identity.user_name(),
        broker = %config.broker_endpoint,
        feed = %config.feed_endpoint,
        "bot started"
    );

    let shutdown = CancellationToken::new();

    let listener = if cli.no_listener {
        None
    } else {
        let connector = ZmqFeedConnector::new(config.feed_endpoint.clone());
        let listener = BroadcastListener::new(
            connector,
            config.backoff,
            config.feed_idle,
            shutdown.child_token(),
        );
        Some(listener.spawn())
    };

    let connector = ZmqConnector::new(config.broker_endpoint.clone());
    let cycle = RequestCycle::new(connector, config, identity, shutdown.clone()).run();
    tokio::pin!(cycle);

    let finished = tokio::select! {
        _ = &mut cycle => true,
        signal = wait_for_shutdown_signal() => {
            match signal {
                Ok(()) => info!("shutdown requested"),
                Err(error) => warn!(?error, "failed to install signal handlers, stopping"),
            }
            false
        }
    };
    if !finished {
        shutdown.cancel();
        cycle.await;
    }

    if let Some(handle) = listener {
        if let Err(error) = handle.await {
            warn!(?error, "feed listener task failed");
        }
    }

    info!("bot stopped");
    Ok(())
}
