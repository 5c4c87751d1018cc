//! Server-side lifecycle of one connection: handshake, relay loop, cleanup.

use std::{io, net::SocketAddr, sync::Arc};

use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    select,
};
use tracing::{debug, info};

use crate::{
    protocol::{ClientLine, LineReader, ServerToClient, display_name, write_line},
    registry::{Inbox, ParticipantId, Registry, outbox},
};

/// Why the relay loop stopped. Every variant leads to the same cleanup.
#[derive(Debug)]
enum Departure {
    Quit,
    Disconnected,
    Failed(io::Error),
}

/// Drives one participant from its first line until its connection is gone.
///
/// Transport errors end the participant quietly; nothing is reported back to
/// the peer and nothing is returned to the caller. Bytes that are not UTF-8 are
/// decoded with replacement characters rather than treated as errors.
pub async fn handle_connection<R, W>(
    reader: R,
    mut writer: W,
    registry: Arc<Registry>,
    peer: Option<SocketAddr>,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = LineReader::new(BufReader::new(reader));

    let name = match lines.next_line().await {
        Ok(first_line) => display_name(first_line.as_deref()),
        Err(err) => {
            debug!(?peer, ?err, "connection failed before handshake");
            shutdown_writer(&mut writer).await;
            return;
        }
    };

    let (sender, mut inbox) = outbox();
    let id = registry.register(name.clone(), sender).await;
    info!(?peer, id, %name, "participant joined");
    registry
        .broadcast_from(id, ServerToClient::Joined { name: name.clone() })
        .await;

    let departure = run_session(&registry, id, &name, &mut lines, &mut writer, &mut inbox).await;
    match &departure {
        Departure::Failed(err) => debug!(?peer, id, %name, ?err, "participant connection failed"),
        other => debug!(?peer, id, %name, reason = ?other, "participant session ended"),
    }

    shutdown_writer(&mut writer).await;
    drop(lines);
    drop(inbox);
    cleanup(&registry, id, peer).await;
}

async fn run_session<R, W>(
    registry: &Registry,
    id: ParticipantId,
    name: &str,
    lines: &mut LineReader<BufReader<R>>,
    writer: &mut W,
    inbox: &mut Inbox,
) -> Departure
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        select! {
            incoming = lines.next_line() => {
                match incoming {
                    Ok(Some(line)) => {
                        if let Some(departure) = handle_client_line(registry, id, name, &line).await {
                            return departure;
                        }
                    }
                    Ok(None) => return Departure::Disconnected,
                    Err(err) => return Departure::Failed(err),
                }
            }
            outgoing = inbox.recv() => {
                // The registry holds our sender until cleanup, so `None` never comes first.
                let Some(message) = outgoing else {
                    return Departure::Disconnected;
                };
                if let Err(err) = write_line(writer, &message.to_string()).await {
                    return Departure::Failed(err);
                }
            }
        }
    }
}

async fn handle_client_line(
    registry: &Registry,
    id: ParticipantId,
    name: &str,
    line: &str,
) -> Option<Departure> {
    match ClientLine::parse(line) {
        ClientLine::Quit => Some(Departure::Quit),
        ClientLine::Blank => None,
        ClientLine::Chat(text) => {
            registry
                .broadcast_from(
                    id,
                    ServerToClient::Chat {
                        name: name.to_string(),
                        text,
                    },
                )
                .await;
            None
        }
    }
}

async fn shutdown_writer<W>(writer: &mut W)
where
    W: AsyncWrite + Unpin,
{
    if let Err(err) = writer.shutdown().await {
        debug!(?err, "failed to shut down participant writer");
    }
}

async fn cleanup(registry: &Registry, id: ParticipantId, peer: Option<SocketAddr>) {
    if let Some(name) = registry.unregister(id).await {
        info!(?peer, id, %name, "participant left");
        registry.broadcast(ServerToClient::Left { name }).await;
    }
}

#[cfg(test)]
mod tests {
    use std::{
        pin::Pin,
        task::{Context, Poll},
        time::Duration,
    };

    use tokio::{
        io::{AsyncBufReadExt, DuplexStream, ReadBuf, duplex},
        task::JoinHandle,
        time::timeout,
    };

    use super::*;

    struct Observer {
        inbox: Inbox,
    }

    impl Observer {
        async fn join(registry: &Registry, name: &str) -> Self {
            let (sender, inbox) = outbox();
            registry.register(name, sender).await;
            Self { inbox }
        }

        async fn next(&mut self) -> ServerToClient {
            timeout(Duration::from_secs(1), self.inbox.recv())
                .await
                .expect("timed out waiting for broadcast")
                .expect("observer outbox closed")
        }
    }

    /// Starts a handler on an in-memory pipe. Returns the peer's end of the pipe.
    fn spawn_handler(registry: &Arc<Registry>) -> (DuplexStream, JoinHandle<()>) {
        let (client_end, server_end) = duplex(4096);
        let (reader, writer) = tokio::io::split(server_end);
        let handle = tokio::spawn(handle_connection(reader, writer, Arc::clone(registry), None));
        (client_end, handle)
    }

    async fn finish(handle: JoinHandle<()>) {
        timeout(Duration::from_secs(1), handle)
            .await
            .expect("handler did not finish")
            .expect("handler panicked");
    }

    #[tokio::test]
    async fn join_then_end_of_stream_announces_join_and_leave() {
        let registry = Arc::new(Registry::new());
        let mut observer = Observer::join(&registry, "observer").await;
        let (mut client, handle) = spawn_handler(&registry);

        client.write_all(b"JOIN carol\n").await.expect("write");
        client.shutdown().await.expect("shutdown");
        finish(handle).await;

        assert_eq!(
            observer.next().await,
            ServerToClient::Joined {
                name: "carol".into()
            }
        );
        assert_eq!(
            observer.next().await,
            ServerToClient::Left {
                name: "carol".into()
            }
        );
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn malformed_handshake_joins_as_anonymous() {
        let registry = Arc::new(Registry::new());
        let mut observer = Observer::join(&registry, "observer").await;
        let (mut client, handle) = spawn_handler(&registry);

        client.write_all(b"hello there\n/quit\n").await.expect("write");
        finish(handle).await;

        assert_eq!(
            observer.next().await,
            ServerToClient::Joined {
                name: "Anonymous".into()
            }
        );
        assert_eq!(
            observer.next().await,
            ServerToClient::Left {
                name: "Anonymous".into()
            }
        );
    }

    #[tokio::test]
    async fn blank_lines_are_not_broadcast() {
        let registry = Arc::new(Registry::new());
        let mut observer = Observer::join(&registry, "observer").await;
        let (mut client, handle) = spawn_handler(&registry);

        client
            .write_all(b"JOIN dave\n\n   \n\t\nreal message\n/QUIT\n")
            .await
            .expect("write");
        finish(handle).await;

        assert_eq!(
            observer.next().await,
            ServerToClient::Joined {
                name: "dave".into()
            }
        );
        assert_eq!(
            observer.next().await,
            ServerToClient::Chat {
                name: "dave".into(),
                text: "real message".into()
            }
        );
        assert_eq!(
            observer.next().await,
            ServerToClient::Left {
                name: "dave".into()
            }
        );
    }

    #[tokio::test]
    async fn broadcasts_are_written_to_the_peer() {
        let registry = Arc::new(Registry::new());
        let (client, handle) = spawn_handler(&registry);
        let (client_reader, mut client_writer) = tokio::io::split(client);
        let mut client_lines = BufReader::new(client_reader).lines();

        client_writer.write_all(b"JOIN erin\n").await.expect("write");
        while registry.is_empty().await {
            tokio::task::yield_now().await;
        }

        registry
            .broadcast(ServerToClient::Chat {
                name: "frank".into(),
                text: "hi erin".into(),
            })
            .await;
        let line = timeout(Duration::from_secs(1), client_lines.next_line())
            .await
            .expect("timed out")
            .expect("read");
        assert_eq!(line.as_deref(), Some("frank: hi erin"));

        client_writer.write_all(b"/quit\n").await.expect("write");
        finish(handle).await;

        // The handler closed its side after quitting.
        let rest = client_lines.next_line().await.expect("read");
        assert_eq!(rest, None);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn invalid_utf8_is_relayed_with_replacement_characters() {
        let registry = Arc::new(Registry::new());
        let mut observer = Observer::join(&registry, "observer").await;
        let (mut client, handle) = spawn_handler(&registry);

        client
            .write_all(b"JOIN caf\xe9\nna\xefve\n/quit\n")
            .await
            .expect("write");
        finish(handle).await;

        assert_eq!(
            observer.next().await.to_string(),
            "[system] caf\u{FFFD} joined the chat."
        );
        assert_eq!(
            observer.next().await.to_string(),
            "caf\u{FFFD}: na\u{FFFD}ve"
        );
        assert_eq!(
            observer.next().await.to_string(),
            "[system] caf\u{FFFD} left the chat."
        );
    }

    /// A connection that is reset before it delivers any data.
    struct ResetReader;

    impl AsyncRead for ResetReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::ErrorKind::ConnectionReset.into()))
        }
    }

    #[tokio::test]
    async fn reset_before_handshake_leaves_no_trace() {
        let registry = Arc::new(Registry::new());
        let mut observer = Observer::join(&registry, "observer").await;
        let (_client, server_end) = duplex(64);

        let handle = tokio::spawn(handle_connection(
            ResetReader,
            server_end,
            Arc::clone(&registry),
            None,
        ));
        finish(handle).await;

        assert_eq!(registry.len().await, 1);
        assert!(observer.inbox.try_recv().is_err());
    }
}
