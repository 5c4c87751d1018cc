use std::{future::Future, io::BufRead, thread};

use anyhow::{Context, Result};
use tokio::{
    io::{self, AsyncBufRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpStream,
    select,
    sync::mpsc,
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    cli::ClientArgs,
    protocol::{QUIT_TOKEN, decode_line, is_quit, join_line, read_line, write_line},
};

/// Lines typed locally that may be waiting for the connection.
const INPUT_BUFFER: usize = 16;

/// How the send direction of a session finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The user typed the quit command and it was forwarded to the server.
    Quit,
    /// Local input reached end-of-stream.
    InputClosed,
    /// Writing to the server failed.
    ConnectionLost,
    /// The interrupt future resolved (Ctrl-C in the binary).
    Interrupted,
}

pub async fn run(args: ClientArgs) -> Result<()> {
    let name = args.display_name();
    // Installed before connecting so an early Ctrl-C is never lost to the default handler.
    let interrupted = interrupt()?;

    let addr = format!("{}:{}", args.host, args.port);
    let stream = TcpStream::connect(&addr)
        .await
        .with_context(|| format!("failed to connect to {addr}"))?;
    info!("connected to {addr}");

    let (reader, writer) = stream.into_split();
    let end = run_session(
        &name,
        spawn_stdin_reader(),
        BufReader::new(reader),
        writer,
        io::stdout(),
        interrupted,
    )
    .await?;
    debug!(?end, "session finished");

    Ok(())
}

#[cfg(unix)]
fn interrupt() -> Result<impl Future<Output = ()>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint =
        signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;
    Ok(async move {
        sigint.recv().await;
    })
}

#[cfg(not(unix))]
fn interrupt() -> Result<impl Future<Output = ()>> {
    Ok(async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(?error, "ctrl-c handler failed");
            std::future::pending::<()>().await;
        }
    })
}

/// Reads stdin on a dedicated thread. A blocking stdin read cannot be cancelled,
/// so it must not live on the runtime, or shutdown would wait for the next line.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (sender, receiver) = mpsc::channel(INPUT_BUFFER);
    thread::spawn(move || {
        let mut stdin = std::io::stdin().lock();
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match stdin.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    if sender.blocking_send(decode_line(&buf)).is_err() {
                        break;
                    }
                }
                Err(error) => {
                    warn!(?error, "failed to read local input");
                    break;
                }
            }
        }
    });
    receiver
}

/// Joins as `name`, then relays `input` lines to the server while copying every
/// line the server sends to `output`. A closed `input` channel counts as
/// end-of-input.
///
/// Returns once the send direction stops or `interrupt` resolves. The receive
/// task is aborted at that point instead of being waited on.
pub async fn run_session<R, W, O, F>(
    name: &str,
    mut input: mpsc::Receiver<String>,
    reader: R,
    mut writer: W,
    mut output: O,
    interrupt: F,
) -> Result<SessionEnd>
where
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin,
    O: AsyncWrite + Unpin + Send + 'static,
    F: Future<Output = ()>,
{
    write_line(&mut writer, &join_line(name))
        .await
        .context("failed to send join line")?;
    write_line(
        &mut output,
        &format!("Connected as '{name}'. Type {QUIT_TOKEN} to exit."),
    )
    .await?;

    let receiver = spawn_receiver(reader, output);
    let end = forward_input(&mut input, &mut writer, interrupt).await;

    if let Err(error) = writer.shutdown().await {
        debug!(?error, "failed to shut down connection writer");
    }
    receiver.abort();
    let _ = receiver.await;

    Ok(end)
}

fn spawn_receiver<R, O>(mut reader: R, mut output: O) -> JoinHandle<()>
where
    R: AsyncBufRead + Unpin + Send + 'static,
    O: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            match read_line(&mut reader).await {
                Ok(Some(line)) => {
                    if let Err(error) = write_line(&mut output, &line).await {
                        debug!(?error, "failed to print server line");
                        break;
                    }
                }
                Ok(None) => break,
                Err(error) => {
                    debug!(?error, "connection read failed");
                    break;
                }
            }
        }
    })
}

async fn forward_input<W, F>(
    input: &mut mpsc::Receiver<String>,
    writer: &mut W,
    interrupt: F,
) -> SessionEnd
where
    W: AsyncWrite + Unpin,
    F: Future<Output = ()>,
{
    tokio::pin!(interrupt);
    loop {
        let line = select! {
            _ = &mut interrupt => return SessionEnd::Interrupted,
            line = input.recv() => line,
        };
        let Some(line) = line else {
            return SessionEnd::InputClosed;
        };

        let (outgoing, end) = if is_quit(&line) {
            (QUIT_TOKEN, Some(SessionEnd::Quit))
        } else {
            (line.as_str(), None)
        };

        if let Err(error) = write_line(writer, outgoing).await {
            debug!(?error, "failed to send line to server");
            return SessionEnd::ConnectionLost;
        }
        if let Some(end) = end {
            return end;
        }
    }
}
