use std::{fmt, io};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_NAME: &str = "Anonymous";
pub const QUIT_TOKEN: &str = "/quit";
pub const JOIN_PREFIX: &str = "JOIN ";

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Resolves the display name announced by the first line of a connection.
///
/// Anything other than `JOIN <name>` (including end-of-stream) is tolerated and
/// falls back to [`DEFAULT_NAME`]. A name that trims to nothing falls back too.
pub fn display_name(first_line: Option<&str>) -> String {
    first_line
        .and_then(|line| line.strip_prefix(JOIN_PREFIX))
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(DEFAULT_NAME)
        .to_string()
}

pub fn join_line(name: &str) -> String {
    format!("{JOIN_PREFIX}{name}")
}

pub fn is_quit(line: &str) -> bool {
    line.trim().eq_ignore_ascii_case(QUIT_TOKEN)
}

/// A line received from a participant after the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientLine {
    Quit,
    Blank,
    Chat(String),
}

impl ClientLine {
    pub fn parse(line: &str) -> Self {
        if is_quit(line) {
            ClientLine::Quit
        } else if line.trim().is_empty() {
            ClientLine::Blank
        } else {
            ClientLine::Chat(line.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerToClient {
    Joined { name: String },
    Left { name: String },
    Chat { name: String, text: String },
}

impl fmt::Display for ServerToClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerToClient::Joined { name } => write!(f, "[system] {name} joined the chat."),
            ServerToClient::Left { name } => write!(f, "[system] {name} left the chat."),
            ServerToClient::Chat { name, text } => write!(f, "{name}: {text}"),
        }
    }
}

/// Decodes raw line bytes, replacing invalid UTF-8 and dropping the terminator.
pub fn decode_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches(LINE_ENDINGS)
        .to_string()
}

/// Reads one line, without its terminator. `Ok(None)` means the peer closed the stream.
///
/// Not cancel-safe: a partial line is lost if the future is dropped. Use
/// [`LineReader`] inside `select!`.
pub async fn read_line<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let bytes = reader.read_until(b'\n', &mut buf).await?;
    if bytes == 0 {
        return Ok(None);
    }
    Ok(Some(decode_line(&buf)))
}

/// Line reader that keeps partially read bytes between calls, so
/// [`LineReader::next_line`] can be raced in `select!` without losing data.
pub struct LineReader<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R> LineReader<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
        }
    }

    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        let bytes = self.reader.read_until(b'\n', &mut self.buf).await?;
        if bytes == 0 && self.buf.is_empty() {
            return Ok(None);
        }
        let line = decode_line(&self.buf);
        self.buf.clear();
        Ok(Some(line))
    }
}

pub async fn write_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    // One write per line so a recipient never sees a message split across writes.
    let mut encoded = Vec::with_capacity(line.len() + 1);
    encoded.extend_from_slice(line.as_bytes());
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await
}
