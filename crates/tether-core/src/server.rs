use std::{future::Future, net::SocketAddr, sync::Arc, time::Instant};

use anyhow::{Context, Result};
use bytes::Bytes;
use http::{header, HeaderValue, StatusCode};
use http_body_util::{combinators::BoxBody, BodyExt, Full, LengthLimitError, Limited};
use hyper::server::conn::http1;
use hyper::{
    body::{Body, Incoming},
    service::service_fn,
    Request, Response,
};
use hyper_util::rt::TokioIo;
use tether_sdk::ServiceCall;
use tokio::net::TcpListener;
use tower::ServiceExt;
use tracing::Instrument;

use crate::{
    handlers::{self, Endpoint, Reply},
    plugin::RemotePlugin,
    router::{RouteMatch, ServiceRoute},
    runtime::PluginRuntime,
};

type ResponseBody = BoxBody<Bytes, hyper::Error>;

/// Largest service call body read off the wire.
const MAX_CALL_BYTES: usize = 1 << 20;

/// Binds a plugin runtime's boundary and service endpoints to a TCP socket.
pub struct PluginServer<P> {
    runtime: Arc<PluginRuntime<P>>,
    listener: TcpListener,
    addr: SocketAddr,
}

impl<P: RemotePlugin> PluginServer<P> {
    pub async fn bind(runtime: Arc<PluginRuntime<P>>, addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind plugin server on {addr}"))?;
        let addr = listener.local_addr()?;
        Ok(Self {
            runtime,
            listener,
            addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Serves until Ctrl+C.
    pub async fn run(self) -> Result<()> {
        self.serve_with_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "failed to install ctrl-c handler");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Accepts connections until `signal` resolves. Connections already
    /// accepted keep running so in-flight calls can finish.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let identity = self.runtime.identity();
        tracing::info!(
            plugin = identity.name(),
            version = identity.version(),
            addr = %self.addr,
            services = self.runtime.services().len(),
            "plugin server ready"
        );

        tokio::pin!(signal);
        loop {
            tokio::select! {
                biased;
                _ = &mut signal => {
                    tracing::info!("shutdown signal received; no longer accepting connections");
                    break;
                }
                accept = self.listener.accept() => {
                    let (stream, peer_addr) = match accept {
                        Ok(conn) => conn,
                        Err(err) => {
                            tracing::warn!(error = %err, "failed to accept connection");
                            continue;
                        }
                    };
                    let runtime = Arc::clone(&self.runtime);
                    tokio::spawn(async move {
                        if let Err(err) = handle_connection(runtime, stream, peer_addr).await {
                            tracing::warn!(error = %err, "connection closed with error");
                        }
                    });
                }
            }
        }

        Ok(())
    }
}

async fn handle_connection<P: RemotePlugin>(
    runtime: Arc<PluginRuntime<P>>,
    stream: tokio::net::TcpStream,
    peer_addr: SocketAddr,
) -> Result<()> {
    let service = service_fn(move |req| {
        let runtime = Arc::clone(&runtime);
        async move { Ok::<_, hyper::Error>(handle_request(runtime, req).await) }
    });
    http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service)
        .await
        .with_context(|| format!("connection handling failed for {peer_addr}"))
}

async fn handle_request<P: RemotePlugin>(
    runtime: Arc<PluginRuntime<P>>,
    req: Request<Incoming>,
) -> Response<ResponseBody> {
    let start = Instant::now();
    let span = tracing::info_span!(
        "request",
        method = %req.method(),
        path = %req.uri().path(),
        kind = tracing::field::Empty,
        status = tracing::field::Empty,
        duration_ms = tracing::field::Empty,
    );
    let (kind, reply) = async {
        match Endpoint::resolve(req.method(), req.uri().path()) {
            RouteMatch::Found(endpoint) => {
                ("lifecycle", lifecycle_request(runtime, endpoint).await)
            }
            RouteMatch::MethodNotAllowed => (
                "lifecycle",
                Reply::error(StatusCode::METHOD_NOT_ALLOWED, "method not allowed"),
            ),
            RouteMatch::NotFound => ("service", service_request(&*runtime, req).await),
        }
    }
    .instrument(span.clone())
    .await;

    let duration = start.elapsed().as_millis() as u64;
    span.record("kind", kind);
    span.record("status", reply.status.as_u16());
    span.record("duration_ms", duration as i64);
    let outcome = if reply.status.is_success() { "ok" } else { "error" };
    metrics::counter!("tether_requests_total", "kind" => kind, "outcome" => outcome).increment(1);
    json_response(reply)
}

/// Runs a boundary operation on its own task so a dropped connection cannot
/// abandon a transition halfway.
async fn lifecycle_request<P: RemotePlugin>(
    runtime: Arc<PluginRuntime<P>>,
    endpoint: Endpoint,
) -> Reply {
    let task = tokio::spawn(async move { handlers::handle(&*runtime, endpoint).await });
    match task.await {
        Ok(reply) => reply,
        Err(err) => {
            tracing::error!(error = %err, endpoint = endpoint.path(), "boundary handler aborted");
            let status = if endpoint == Endpoint::Unload {
                StatusCode::OK
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            Reply::error(status, "internal error")
        }
    }
}

async fn service_request<P: RemotePlugin>(
    runtime: &PluginRuntime<P>,
    req: Request<Incoming>,
) -> Reply {
    let route = match runtime.router().select(req.method(), req.uri().path()) {
        RouteMatch::Found(route) => route.clone(),
        RouteMatch::MethodNotAllowed => {
            return Reply::error(StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
        }
        RouteMatch::NotFound => return Reply::error(StatusCode::NOT_FOUND, "no matching service"),
    };

    let state = runtime.state();
    if !state.is_started() {
        return Reply::error(
            StatusCode::SERVICE_UNAVAILABLE,
            format!("plugin is {state}; service `{}` is not accepting calls", route.descriptor.name),
        );
    }

    let call = match read_call(req.into_body()).await {
        Ok(call) => call,
        Err(reply) => return reply,
    };
    invoke(route, call).await
}

async fn read_call<B>(body: B) -> std::result::Result<ServiceCall, Reply>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let body = match Limited::new(body, MAX_CALL_BYTES).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) if err.downcast_ref::<LengthLimitError>().is_some() => {
            return Err(Reply::error(
                StatusCode::PAYLOAD_TOO_LARGE,
                format!("service call body exceeds {MAX_CALL_BYTES} bytes"),
            ))
        }
        Err(err) => {
            return Err(Reply::error(
                StatusCode::BAD_REQUEST,
                format!("failed to read request body: {err}"),
            ))
        }
    };
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(ServiceCall::default());
    }
    serde_json::from_slice(&body).map_err(|err| {
        Reply::error(
            StatusCode::BAD_REQUEST,
            format!("request body is not a valid service call: {err}"),
        )
    })
}

async fn invoke(route: ServiceRoute, call: ServiceCall) -> Reply {
    let name = route.descriptor.name;
    match route.handler.oneshot(call).await {
        Ok(value) => Reply {
            status: StatusCode::OK,
            body: value,
        },
        Err(err) => {
            let message = format!("{err:#}");
            tracing::warn!(service = %name, error = %message, "service call failed");
            Reply::error(StatusCode::INTERNAL_SERVER_ERROR, message)
        }
    }
}

fn json_response(reply: Reply) -> Response<ResponseBody> {
    let bytes = serde_json::to_vec(&reply.body).unwrap_or_else(|_| b"null".to_vec());
    let body = Full::new(Bytes::from(bytes))
        .map_err(|never| match never {})
        .boxed();
    let mut response = Response::new(body);
    *response.status_mut() = reply.status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}
