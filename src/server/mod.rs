//! HTTP front end: users, file-backed mocks, health and request inspection.

mod handlers;
mod request_log;
mod router;
mod types;

pub use request_log::RequestLog;

use crate::error::Result;
use crate::mocks::MockRegistry;
use crate::store::UserStore;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use router::route_request;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info};

/// Everything a request handler can reach.
pub struct AppState {
    pub store: UserStore,
    pub mocks: MockRegistry,
    pub log: RequestLog,
}

pub struct Server {
    addr: SocketAddr,
    state: Arc<AppState>,
}

impl Server {
    pub fn new(addr: SocketAddr, state: AppState) -> Self {
        Self {
            addr,
            state: Arc::new(state),
        }
    }

    /// Accepts connections until the listener fails.
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        info!("dirfix listening on http://{}", listener.local_addr()?);

        loop {
            let (stream, peer) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let state = Arc::clone(&self.state);

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let state = Arc::clone(&state);
                    async move { route_request(req, state).await }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    debug!("Connection error from {}: {}", peer, e);
                }
            });
        }
    }
}
