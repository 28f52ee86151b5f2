//! HTTP front end for remote execution.
//!
//! The axum side is multi-threaded and `Send`; engine work is not. Requests are
//! validated on the axum side, then handed over a channel to a dedicated engine
//! thread that owns a current-thread runtime. Each request gets its own fresh
//! top world via [`opal`], and requests run one at a time.

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::{io, thread};

use axum::Router;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use opal_engine::{Context, NodeConfig, opal};
use opal_types::wire::{EXECUTE_PATH, ExecuteRequest, ExecuteResponse, Tagged};
use tokio::net::TcpListener;
use tokio::runtime;
use tokio::sync::{mpsc, oneshot};

use crate::args::RemoteArgs;
use crate::registry::{ProcedureRegistry, RemoteProcedure};
use crate::RemoteError;

type Reply = Result<ExecuteResponse, RemoteError>;

struct Job {
    request: ExecuteRequest,
    reply: oneshot::Sender<Reply>,
}

#[derive(Clone)]
struct EngineHandle {
    jobs: mpsc::UnboundedSender<Job>,
}

impl EngineHandle {
    /// The thread exits once every handle is dropped.
    fn spawn(registry: Arc<ProcedureRegistry>) -> Result<Self, RemoteError> {
        let (jobs, rx) = mpsc::unbounded_channel();
        let runtime = runtime::Builder::new_current_thread().enable_all().build()?;
        thread::Builder::new()
            .name("opal-engine".to_string())
            .spawn(move || runtime.block_on(run_jobs(registry, rx)))?;
        Ok(Self { jobs })
    }

    async fn submit(&self, request: ExecuteRequest) -> Reply {
        let (reply, rx) = oneshot::channel();
        self.jobs
            .send(Job { request, reply })
            .map_err(|_| io::Error::other("engine thread stopped"))?;
        rx.await
            .map_err(|_| io::Error::other("engine thread dropped the request"))?
    }
}

async fn run_jobs(registry: Arc<ProcedureRegistry>, mut rx: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = rx.recv().await {
        let reply = execute_request(&registry, job.request).await;
        // The HTTP side may have given up on the request.
        let _ = job.reply.send(reply);
    }
    tracing::debug!("engine thread stopping");
}

/// Run one request against `registry` on the current thread.
pub async fn execute_request(registry: &ProcedureRegistry, request: ExecuteRequest) -> Reply {
    validate_params(&request.params)?;
    let procedure = registry.lookup(&request.code)?;
    tracing::debug!(procedure = %request.code, params = request.params.len(), "executing");

    let params = request.params;
    let outcome = opal(move |top| async move { anyhow::Ok(run_procedure(top, procedure, params).await) }).await?;
    Ok(ExecuteResponse { params: outcome? })
}

async fn run_procedure(
    top: Context,
    procedure: Arc<dyn RemoteProcedure>,
    params: Vec<(String, Tagged)>,
) -> Result<BTreeMap<String, Tagged>, RemoteError> {
    let args = RemoteArgs::new(top.clone(), params);
    let child = {
        let args = args.clone();
        top.hypothetical(move |ctx| procedure.call(ctx, args))
    };

    child.acquire();
    let finished = child.finish().await;
    child.release()?;

    // A bad parameter is the caller's fault even though it surfaced as a body error.
    if let Some(err) = args.failure() {
        return Err(err);
    }
    finished?;
    args.encode(&child)
}

/// Only `Weight` and `Node` may appear in argument position, each name once.
fn validate_params(params: &[(String, Tagged)]) -> Result<(), RemoteError> {
    let mut seen = HashSet::new();
    for (name, tagged) in params {
        if !seen.insert(name.as_str()) {
            return Err(RemoteError::malformed(format!("duplicate parameter {name:?}")));
        }
        if !matches!(tagged, Tagged::Weight(_) | Tagged::Node(_)) {
            return Err(RemoteError::malformed(format!(
                "parameter {name:?}: {} is not allowed in argument position",
                tagged.kind()
            )));
        }
    }
    Ok(())
}

#[derive(Clone)]
struct NodeState {
    engine: EngineHandle,
}

/// A bound, not yet serving, remote node.
pub struct RemoteNode {
    listener: TcpListener,
    router: Router,
    local_addr: SocketAddr,
}

impl RemoteNode {
    pub async fn bind(config: &NodeConfig, registry: ProcedureRegistry) -> Result<Self, RemoteError> {
        let addr = config
            .bind_addr()
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err.to_string()))?;
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        let registry = Arc::new(registry);
        tracing::info!(addr = %local_addr, procedures = registry.len(), "remote node bound");
        let state = NodeState {
            engine: EngineHandle::spawn(registry)?,
        };
        let router = Router::new()
            .route(EXECUTE_PATH, post(execute))
            .layer(DefaultBodyLimit::max(config.max_body_bytes))
            .with_state(state);

        Ok(Self {
            listener,
            router,
            local_addr,
        })
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn serve(self) -> Result<(), RemoteError> {
        axum::serve(self.listener, self.router).await?;
        Ok(())
    }

    pub async fn serve_with_shutdown<S>(self, signal: S) -> Result<(), RemoteError>
    where
        S: Future<Output = ()> + Send + 'static,
    {
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(signal)
            .await?;
        tracing::info!(addr = %self.local_addr, "remote node stopped");
        Ok(())
    }
}

async fn execute(State(state): State<NodeState>, body: Bytes) -> Response {
    match handle(&state, &body).await {
        Ok(response) => match serde_json::to_string(&response) {
            Ok(json) => (StatusCode::OK, [(header::CONTENT_TYPE, "application/json")], json).into_response(),
            Err(err) => error_response(&RemoteError::from(err)),
        },
        Err(err) => error_response(&err),
    }
}

async fn handle(state: &NodeState, body: &[u8]) -> Reply {
    // Validation and lookup happen in `execute_request` on the engine thread.
    let request: ExecuteRequest = serde_json::from_slice(body)?;
    state.engine.submit(request).await
}

fn error_response(err: &RemoteError) -> Response {
    let status = if err.is_client_error() {
        tracing::debug!(error = %err, "rejected request");
        StatusCode::BAD_REQUEST
    } else {
        tracing::error!(error = %err, "request failed");
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, err.to_string()).into_response()
}
