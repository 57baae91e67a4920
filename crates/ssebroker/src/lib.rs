//! # ssebroker
//!
//! A Server-Sent Events broker: publishers hand named text events to a
//! [`Broker`], which fans each one out to every connected subscriber over a
//! long-lived `text/event-stream` response.
//!
//! The crate has three layers:
//!
//! - [`Broker`]: a single coordinator task owning the subscriber set. Publish,
//!   register and unregister are serialized through one command queue.
//! - [`Event`]: the wire encoder for event frames.
//! - [`SessionHandler`]: per-connection HTTP handling, forwarding frames from
//!   a [`Subscription`] into the response body.
//!
//! [`Server`] puts these behind a hyper HTTP/1.1 listener.
//!
//! ## Example
//!
//! ```rust,ignore
//! use ssebroker::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), BoxError> {
//!     let config = Config::from_env()?;
//!     let cancel = CancellationToken::new();
//!
//!     let (broker, _) = Broker::spawn(config.broker(), cancel.clone());
//!     let sessions = SessionHandler::new(broker.clone(), config.session(), cancel.clone());
//!
//!     tokio::spawn(async move {
//!         let mut n = 0u64;
//!         loop {
//!             tokio::time::sleep(std::time::Duration::from_secs(1)).await;
//!             n += 1;
//!             let _ = broker.send_event(n.to_string(), "tick", n.to_string());
//!         }
//!     });
//!
//!     Server::new(sessions, &config.server(), cancel)
//!         .run(&config.addr)
//!         .await
//! }
//! ```

mod body;
mod broker;
pub mod compression;
pub mod config;
mod coordinator;
mod error;
mod event;
pub mod logging;
mod server;
pub mod session;

pub use body::{IntoResponse, Response, ResponseBody};
pub use broker::{Broker, Subscription};
pub use config::{load_dotenv, BrokerConfig, Config, ServerConfig, SessionConfig};
pub use coordinator::SubscriberId;
pub use error::{ApiError, BrokerError, ConfigError, Result, SessionError};
pub use event::{comment, retry_hint, Event};
pub use server::{BoxError, Server};
pub use session::{EventSink, SessionHandler};

/// Re-export tokio_util's cancellation token, used to stop every layer
pub use tokio_util::sync::CancellationToken;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        Broker, BoxError, BrokerConfig, CancellationToken, Config, Event, Server, SessionConfig,
        SessionHandler, Subscription,
    };
}
