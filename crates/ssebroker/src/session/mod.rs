//! Stream session handling
//!
//! [`SessionHandler`] turns one HTTP request into a long-lived event stream:
//! it answers CORS preflights, refuses transports that cannot stream,
//! registers a subscription and spawns the loop that forwards frames into the
//! response body until the connection ends.

mod forward;
mod negotiate;
mod sink;

pub use forward::{forward, ForwardOptions, SessionEnd};
pub use sink::{ChannelSink, EventSink};

use crate::body::{IntoResponse, Response, ResponseBody};
use crate::broker::Broker;
use crate::compression::Encoding;
use crate::config::SessionConfig;
use crate::error::ApiError;
use http::{Method, Request, StatusCode};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Serves subscription requests.
#[derive(Clone)]
pub struct SessionHandler {
    broker: Broker,
    config: Arc<SessionConfig>,
    cancel: CancellationToken,
}

impl SessionHandler {
    /// Create a handler; every session it starts ends when `cancel` fires.
    pub fn new(broker: Broker, config: SessionConfig, cancel: CancellationToken) -> Self {
        Self {
            broker,
            config: Arc::new(config),
            cancel,
        }
    }

    /// The broker sessions subscribe to
    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    /// Answer one request on the subscription route.
    ///
    /// For a stream this returns as soon as headers are ready; frames keep
    /// flowing into the body from a spawned task. Must be called within a
    /// tokio runtime.
    pub fn handle<B>(&self, req: &Request<B>) -> Response {
        let request_headers = req.headers();

        if req.method() == Method::OPTIONS {
            let mut response = StatusCode::OK.into_response();
            *response.headers_mut() = negotiate::stream_headers(request_headers);
            return response;
        }

        if !negotiate::supports_streaming(req.version()) {
            warn!(version = ?req.version(), "client transport cannot stream events");
            let mut response = ApiError::streaming_unsupported().into_response();
            response
                .headers_mut()
                .extend(negotiate::cors_headers(request_headers));
            return response;
        }

        let subscription = match self.broker.subscribe() {
            Ok(subscription) => subscription,
            Err(err) => return ApiError::from(err).into_response(),
        };

        let options = ForwardOptions {
            legacy: self
                .config
                .is_legacy_client(negotiate::user_agent(request_headers)),
            keep_alive: self.config.keep_alive,
            retry: self.config.retry,
        };
        let encoding = self.negotiate_encoding(request_headers);

        let mut headers = negotiate::stream_headers(request_headers);
        negotiate::apply_encoding(&mut headers, encoding);

        let (tx, body) = ResponseBody::channel(1);
        let sink = ChannelSink::new(tx);
        let cancel = self.cancel.clone();
        debug!(
            subscriber = %subscription.id(),
            encoding = encoding.content_encoding(),
            "starting event stream"
        );

        match encoding {
            Encoding::Identity => {
                tokio::spawn(forward(subscription, sink, options, cancel));
            }
            #[cfg(feature = "compression")]
            encoding => match crate::compression::CompressedSink::new(sink, encoding) {
                Ok(sink) => {
                    tokio::spawn(forward(subscription, sink, options, cancel));
                }
                Err(sink) => {
                    tokio::spawn(forward(subscription, sink, options, cancel));
                }
            },
            #[cfg(not(feature = "compression"))]
            _ => {
                tokio::spawn(forward(subscription, sink, options, cancel));
            }
        }

        let mut response = Response::new(body);
        *response.headers_mut() = headers;
        response
    }

    fn negotiate_encoding(&self, request: &http::HeaderMap) -> Encoding {
        if cfg!(feature = "compression") && self.config.compression {
            negotiate::accepted_encoding(request)
        } else {
            Encoding::Identity
        }
    }
}

impl std::fmt::Debug for SessionHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandler")
            .field("config", &self.config)
            .finish()
    }
}
