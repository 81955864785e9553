//! Runs the service's HTTP servers side by side.

use crate::error::Error;

use std::net::SocketAddr;

use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// A router bound to its listener, ready to serve.
pub struct BoundServer {
    name: &'static str,
    listener: TcpListener,
    router: Router,
}

impl BoundServer {
    /// Binds `router` to `listen_addr`.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn bind(
        name: &'static str,
        listen_addr: SocketAddr,
        router: Router,
    ) -> Result<Self, Error> {
        let listener = TcpListener::bind(listen_addr)
            .await
            .map_err(|e| Error::Bind(name, e))?;

        Ok(Self {
            name,
            listener,
            router,
        })
    }

    /// Address the server accepts connections on.
    #[cfg(test)]
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

/// Serves every server until `shutdown` fires or any server exits, then
/// shuts the remaining ones down gracefully.
///
/// # Errors
///
/// Returns the error of the first server that failed.
pub async fn serve_all(servers: Vec<BoundServer>, shutdown: CancellationToken) -> Result<(), Error> {
    let shutdown = shutdown.child_token();
    let mut tasks = JoinSet::new();

    for BoundServer {
        name,
        listener,
        router,
    } in servers
    {
        info!(server = name, addr = ?listener.local_addr().ok(), "starting server");

        let shutdown = shutdown.clone();
        tasks.spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await;
            (name, result)
        });
    }

    let mut first_error = None;

    while let Some(joined) = tasks.join_next().await {
        // One server stopping stops the others.
        shutdown.cancel();

        match joined {
            Ok((name, Ok(()))) => info!(server = name, "server stopped"),
            Ok((name, Err(e))) => {
                error!(server = name, error = %e, "server failed");
                first_error.get_or_insert(Error::Serve(name, e));
            }
            Err(e) => error!(error = %e, "server task panicked"),
        }
    }

    first_error.map_or(Ok(()), Err)
}
