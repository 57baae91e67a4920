//! HTTP server hosting the subscription route

use crate::body::{IntoResponse, Response, ResponseBody};
use crate::config::ServerConfig;
use crate::error::{ApiError, Result};
use crate::session::SessionHandler;
use bytes::Bytes;
use http::{header, HeaderValue, Method, StatusCode};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use hyper_util::server::graceful::GracefulShutdown;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Error returned by [`Server::run`]
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);
const HEADER_READ_TIMEOUT: Duration = Duration::from_secs(15);
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Serves the event stream (and an optional index page) over HTTP/1.1.
pub struct Server {
    routes: Routes,
    cancel: CancellationToken,
}

struct Routes {
    sessions: SessionHandler,
    stream_path: String,
    index: Option<Bytes>,
}

impl Server {
    /// Create a server that stops accepting connections when `cancel` fires.
    pub fn new(sessions: SessionHandler, config: &ServerConfig, cancel: CancellationToken) -> Self {
        Self {
            routes: Routes {
                sessions,
                stream_path: config.stream_path.clone(),
                index: None,
            },
            cancel,
        }
    }

    /// Serve `html` at `/`
    pub fn with_index(mut self, html: impl Into<Bytes>) -> Self {
        self.routes.index = Some(html.into());
        self
    }

    /// Bind `addr` and serve until cancelled
    pub async fn run(self, addr: &str) -> std::result::Result<(), BoxError> {
        let addr: SocketAddr = addr.parse()?;
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from `listener` until cancelled, then wait for open
    /// connections to finish.
    pub async fn serve(self, listener: TcpListener) -> std::result::Result<(), BoxError> {
        let addr = listener.local_addr()?;
        info!(
            "event stream available at http://{}{}",
            addr, self.routes.stream_path
        );

        let routes = Arc::new(self.routes);
        let graceful = GracefulShutdown::new();

        loop {
            let (stream, remote_addr) = tokio::select! {
                _ = self.cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(err) if is_connection_error(&err) => {
                        debug!(error = %err, "connection dropped before accept");
                        continue;
                    }
                    Err(err) => {
                        // Resource exhaustion (e.g. EMFILE) persists across retries.
                        warn!(error = %err, "failed to accept connection");
                        tokio::select! {
                            _ = self.cancel.cancelled() => break,
                            _ = tokio::time::sleep(ACCEPT_BACKOFF) => continue,
                        }
                    }
                },
            };

            let routes = routes.clone();
            let service = service_fn(move |req: hyper::Request<Incoming>| {
                let routes = routes.clone();
                async move { Ok::<_, Infallible>(routes.handle(&req)) }
            });

            let conn = http1::Builder::new()
                .timer(TokioTimer::new())
                .header_read_timeout(HEADER_READ_TIMEOUT)
                .serve_connection(TokioIo::new(stream), service);
            let conn = graceful.watch(conn);
            tokio::spawn(async move {
                if let Err(err) = conn.await {
                    debug!(remote = %remote_addr, error = %err, "connection error");
                }
            });
        }

        drop(listener);
        info!("shutting down, waiting for open connections");
        tokio::select! {
            _ = graceful.shutdown() => info!("all connections closed"),
            _ = tokio::time::sleep(SHUTDOWN_GRACE) => error!("timed out waiting for connections to close"),
        }
        Ok(())
    }
}

impl Routes {
    fn handle<B>(&self, req: &http::Request<B>) -> Response {
        let start = Instant::now();
        let response = self.route(req).into_response();
        log_request(req.method(), req.uri().path(), response.status(), start);
        response
    }

    fn route<B>(&self, req: &http::Request<B>) -> Result<Response> {
        let method = req.method();
        let path = req.uri().path();

        if path == self.stream_path {
            return if method == Method::GET || method == Method::OPTIONS {
                Ok(self.sessions.handle(req))
            } else {
                Err(method_not_allowed(method, path, "GET, OPTIONS"))
            };
        }

        match (&self.index, path) {
            (Some(index), "/") if method == Method::GET => Ok(index_page(index.clone())),
            (Some(_), "/") => Err(method_not_allowed(method, path, "GET")),
            _ => Err(ApiError::not_found(format!("No route found for {} {}", method, path))),
        }
    }
}

fn index_page(html: Bytes) -> Response {
    let mut response = Response::new(ResponseBody::full(html));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    response
}

fn method_not_allowed(method: &Method, path: &str, allow: &'static str) -> ApiError {
    ApiError::method_not_allowed(format!("Method {} not allowed for {}", method, path))
        .with_header(header::ALLOW, HeaderValue::from_static(allow))
}

/// Aborted or reset handshakes only affect that one peer.
fn is_connection_error(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::ConnectionReset
    )
}

/// Log request completion; for streams this is when headers are sent.
fn log_request(method: &Method, path: &str, status: StatusCode, start: Instant) {
    let elapsed = start.elapsed();

    if status.is_success() {
        info!(
            method = %method,
            path = %path,
            status = %status.as_u16(),
            duration_ms = %elapsed.as_millis(),
            "Request completed"
        );
    } else {
        warn!(
            method = %method,
            path = %path,
            status = %status.as_u16(),
            duration_ms = %elapsed.as_millis(),
            "Request failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BrokerConfig, SessionConfig};
    use crate::Broker;

    fn routes(index: Option<&'static str>) -> Routes {
        let cancel = CancellationToken::new();
        let (broker, _) = Broker::spawn(BrokerConfig::default(), cancel.clone());
        Routes {
            sessions: SessionHandler::new(broker, SessionConfig::default(), cancel),
            stream_path: "/events".to_string(),
            index: index.map(|html| Bytes::from_static(html.as_bytes())),
        }
    }

    fn request(method: Method, path: &str) -> http::Request<()> {
        http::Request::builder()
            .method(method)
            .uri(path)
            .body(())
            .unwrap()
    }

    #[tokio::test]
    async fn stream_path_accepts_get_and_options_only() {
        let routes = routes(None);

        let get = routes.handle(&request(Method::GET, "/events"));
        assert_eq!(get.status(), StatusCode::OK);
        assert_eq!(get.headers()[header::CONTENT_TYPE], "text/event-stream");

        assert_eq!(
            routes.handle(&request(Method::OPTIONS, "/events")).status(),
            StatusCode::OK
        );

        let post = routes.handle(&request(Method::POST, "/events"));
        assert_eq!(post.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(post.headers()[header::ALLOW], "GET, OPTIONS");
    }

    #[tokio::test]
    async fn index_is_served_only_when_configured() {
        let without = routes(None);
        assert_eq!(
            without.handle(&request(Method::GET, "/")).status(),
            StatusCode::NOT_FOUND
        );

        let with = routes(Some("<html></html>"));
        let page = with.handle(&request(Method::GET, "/"));
        assert_eq!(page.status(), StatusCode::OK);
        assert_eq!(page.headers()[header::CONTENT_TYPE], "text/html; charset=utf-8");

        let put = with.handle(&request(Method::PUT, "/"));
        assert_eq!(put.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(put.headers()[header::ALLOW], "GET");
    }

    #[tokio::test]
    async fn unknown_path_is_not_found() {
        let routes = routes(None);
        let err = routes.route(&request(Method::GET, "/missing")).unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.message, "No route found for GET /missing");
    }

    #[test]
    fn only_per_peer_accept_errors_skip_the_backoff() {
        use std::io::{Error, ErrorKind};

        assert!(is_connection_error(&Error::from(ErrorKind::ConnectionReset)));
        assert!(is_connection_error(&Error::from(ErrorKind::ConnectionAborted)));
        assert!(!is_connection_error(&Error::from_raw_os_error(24)));
        assert!(!is_connection_error(&Error::from(ErrorKind::OutOfMemory)));
    }
}
