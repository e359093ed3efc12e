//! HTTP/1 accept loop
//!
//! One loop per bound address. Each connection is served on its own task,
//! registered with a shared [`TaskTracker`] so shutdown can wait for
//! in-flight requests.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::error::{Error, Result};

/// Response type produced by every endpoint
pub type HttpResponse = Response<Full<Bytes>>;

/// A request/response handler bound to one listener.
#[async_trait]
pub trait Endpoint: Send + Sync + 'static {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    async fn respond(&self, method: &Method, uri: &Uri) -> HttpResponse;
}

/// Build a response with a body and content type.
pub fn reply(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> HttpResponse {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

/// Plain-text response
pub fn text(status: StatusCode, body: impl Into<Bytes>) -> HttpResponse {
    reply(status, "text/plain; charset=utf-8", body)
}

/// Bind a listener, mapping failures to a configuration error.
pub async fn bind(addr: &str) -> Result<TcpListener> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Config(format!("Invalid bind address {}: {}", addr, e)))?;
    TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Config(format!("Failed to bind {}: {}", addr, e)))
}

async fn dispatch(
    endpoint: Arc<dyn Endpoint>,
    req: Request<hyper::body::Incoming>,
) -> std::result::Result<HttpResponse, Infallible> {
    let started = Instant::now();
    let method = req.method().clone();
    let uri = req.uri().clone();

    let response = endpoint.respond(&method, &uri).await;

    info!(
        endpoint = endpoint.name(),
        method = %method,
        path = uri.path(),
        status = response.status().as_u16(),
        duration_ms = started.elapsed().as_secs_f64() * 1000.0,
        "HTTP request"
    );
    Ok(response)
}

/// Accept connections until `cancel` fires.
///
/// Once cancelled, no new connections are accepted and open connections are
/// asked to finish their current request and close. Callers wait for them
/// through `tracker`.
pub async fn serve(
    listener: TcpListener,
    endpoint: Arc<dyn Endpoint>,
    cancel: CancellationToken,
    tracker: TaskTracker,
) -> Result<()> {
    let local = listener.local_addr()?;
    info!("{} server listening on {}", endpoint.name(), local);

    loop {
        let (stream, peer) = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!(endpoint = endpoint.name(), error = %e, "Accept failed");
                    continue;
                }
            },
        };

        let io = TokioIo::new(stream);
        let endpoint = Arc::clone(&endpoint);
        let cancel = cancel.clone();

        tracker.spawn(async move {
            let name = endpoint.name();
            let service = service_fn(move |req| dispatch(Arc::clone(&endpoint), req));
            let conn = http1::Builder::new().serve_connection(io, service);
            tokio::pin!(conn);

            let result = tokio::select! {
                result = conn.as_mut() => result,
                _ = cancel.cancelled() => {
                    conn.as_mut().graceful_shutdown();
                    conn.await
                }
            };

            if let Err(e) = result {
                debug!(endpoint = name, peer = %peer, error = %e, "Connection closed with error");
            }
        });
    }

    info!("{} server stopped accepting connections", endpoint.name());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    struct Echo;

    #[async_trait]
    impl Endpoint for Echo {
        fn name(&self) -> &'static str {
            "echo"
        }

        async fn respond(&self, method: &Method, uri: &Uri) -> HttpResponse {
            text(StatusCode::OK, format!("{} {}", method, uri))
        }
    }

    #[test]
    fn test_reply_sets_status_and_content_type() {
        let response = reply(StatusCode::IM_A_TEAPOT, "application/json", "{}");
        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
    }

    #[tokio::test]
    async fn test_bind_rejects_bad_address() {
        assert!(matches!(bind("not-an-address").await, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_serve_answers_and_stops_on_cancel() {
        let listener = bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();

        let server = tokio::spawn(serve(listener, Arc::new(Echo), cancel.clone(), tracker.clone()));

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /ping?x=1 HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut raw = String::new();
        stream.read_to_string(&mut raw).await.unwrap();

        assert!(raw.starts_with("HTTP/1.1 200 OK"));
        assert!(raw.ends_with("GET /ping?x=1"));

        cancel.cancel();
        server.await.unwrap().unwrap();
        tracker.close();
        tracker.wait().await;
    }
}
