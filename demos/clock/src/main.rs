//! Clock demo
//!
//! Publishes a `currentTime` event every second and serves a page at `/`
//! that shows it. Ctrl-C ends every stream and stops the server.
//!
//! ```text
//! cargo run -p ssebroker-clock
//! open http://127.0.0.1:5000/
//! ```

use ssebroker::prelude::*;
use ssebroker::{load_dotenv, logging};
use std::time::Duration;
use tracing::info;

const INDEX_HTML: &str = include_str!("index.html");

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    load_dotenv();
    let config = Config::from_env()?;
    logging::init(config.log_format, &config.log_level);

    let cancel = CancellationToken::new();
    let (broker, coordinator) = Broker::spawn(config.broker(), cancel.clone());

    tokio::spawn(publish_time(broker.clone(), cancel.clone()));

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received interrupt, shutting down");
        }
        shutdown.cancel();
    });

    let sessions = SessionHandler::new(broker, config.session(), cancel.clone());
    Server::new(sessions, &config.server(), cancel)
        .with_index(INDEX_HTML.replace("/sse-stream", &config.stream_path))
        .run(&config.addr)
        .await?;

    coordinator.await?;
    Ok(())
}

async fn publish_time(broker: Broker, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let now = chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z").to_string();
                if broker.send_event("1", "currentTime", now).is_err() {
                    break;
                }
            }
        }
    }
}
