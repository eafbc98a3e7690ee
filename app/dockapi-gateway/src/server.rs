//! TCP server loop.

use crate::api::create_router;
use dockapi_core::Runtime;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::Service;
use tower_http::trace::TraceLayer;

/// HTTP server bound to a TCP address.
pub struct ApiServer {
    listener: TcpListener,
    runtime: Arc<Runtime>,
}

impl ApiServer {
    /// Binds the listening socket.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn bind(addr: SocketAddr, runtime: Arc<Runtime>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, runtime })
    }

    /// Returns the bound address.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket has no local address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves connections until `shutdown` is cancelled.
    ///
    /// Connections already accepted keep running on their own tasks; their
    /// long-lived work (log follows, readiness waits, exec) observes the
    /// runtime's shutdown token.
    ///
    /// # Errors
    ///
    /// Returns an error if accepting a connection fails.
    pub async fn run(self, shutdown: CancellationToken) -> io::Result<()> {
        let app = create_router(Arc::clone(&self.runtime)).layer(TraceLayer::new_for_http());

        if let Ok(addr) = self.listener.local_addr() {
            tracing::info!("dockapi listening on http://{}", addr);
        }

        loop {
            let (stream, peer) = tokio::select! {
                () = shutdown.cancelled() => {
                    tracing::info!("server shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => accepted?,
            };

            let tower_service = app.clone();
            tokio::spawn(async move {
                let hyper_service =
                    hyper::service::service_fn(move |request: hyper::Request<Incoming>| {
                        tower_service.clone().call(request)
                    });

                if let Err(err) = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), hyper_service)
                    .await
                {
                    let err_str = err.to_string().to_lowercase();
                    if !err_str.contains("shutting down")
                        && !err_str.contains("connection reset")
                        && !err_str.contains("broken pipe")
                    {
                        tracing::error!(peer = %peer, "Error serving connection: {}", err);
                    }
                }
            });
        }
    }
}
