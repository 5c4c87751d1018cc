use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use tokio::{
    net::{TcpListener, TcpStream, ToSocketAddrs},
    select,
};
use tracing::{info, warn};

use crate::{participant::handle_connection, registry::Registry};

pub struct ChatServer {
    listener: TcpListener,
    registry: Arc<Registry>,
}

impl ChatServer {
    pub fn new(listener: TcpListener) -> Self {
        Self {
            listener,
            registry: Arc::new(Registry::new()),
        }
    }

    pub async fn bind<A>(addr: A) -> Result<Self>
    where
        A: ToSocketAddrs + std::fmt::Debug,
    {
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {addr:?}"))?;
        Ok(Self::new(listener))
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Accepts connections until `shutdown` resolves. Each connection gets its own task.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let ChatServer { listener, registry } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("chat server shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &registry);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
                std::future::pending::<()>().await;
            }
        })
        .await
    }
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    registry: &Arc<Registry>,
) {
    match result {
        Ok((stream, peer)) => spawn_participant(stream, peer, registry),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_participant(stream: TcpStream, peer: SocketAddr, registry: &Arc<Registry>) {
    let registry = Arc::clone(registry);
    tokio::spawn(async move {
        let (reader, writer) = stream.into_split();
        handle_connection(reader, writer, registry, Some(peer)).await;
    });
}
