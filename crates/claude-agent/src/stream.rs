use tokio::io::{AsyncRead, AsyncReadExt};

use crate::types::Message;
use crate::Result;

const READ_CHUNK: usize = 8 * 1024;

// ─── LineDecoder ──────────────────────────────────────────────────────────

/// Splits an arbitrary sequence of byte chunks into complete lines.
///
/// A trailing fragment without a newline is held back and prepended to the
/// next chunk, so a JSON event split across reads is only ever seen whole.
#[derive(Debug, Default)]
pub struct LineDecoder {
    pending: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return every line it completed, in order.
    /// Line terminators (`\n` and a preceding `\r`) are stripped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.pending[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            lines.push(decode_line(&self.pending[start..end]));
            start = end + 1;
        }
        self.pending.drain(..start);
        lines
    }

    /// Flush whatever is left once the source reaches EOF.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(decode_line(&rest))
    }

    /// Bytes currently buffered without a terminating newline.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

// ─── Line parsing ─────────────────────────────────────────────────────────

/// What a single stdout line turned out to be.
#[derive(Debug, Clone)]
pub enum StreamItem {
    /// A recognised stream-json event.
    Event(Message),
    /// Anything else: blank lines, non-JSON chatter, JSON of an unknown shape.
    Noise(String),
}

/// Parse one complete line. Never fails: lines that are not a recognised
/// event come back as [`StreamItem::Noise`].
pub fn parse_line(line: &str) -> StreamItem {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return StreamItem::Noise(String::new());
    }
    match serde_json::from_str::<Message>(trimmed) {
        Ok(Message::Unknown) => StreamItem::Noise(trimmed.to_owned()),
        Ok(msg) => StreamItem::Event(msg),
        Err(e) => {
            tracing::debug!(error = %e, "unparseable stream line");
            StreamItem::Noise(trimmed.to_owned())
        }
    }
}

// ─── EventReader ──────────────────────────────────────────────────────────

/// Reads a child's stdout chunk by chunk and yields parsed lines in arrival
/// order.
pub struct EventReader<R> {
    reader: R,
    decoder: LineDecoder,
    ready: std::collections::VecDeque<String>,
    chunk: Box<[u8]>,
    eof: bool,
}

impl<R: AsyncRead + Unpin> EventReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            decoder: LineDecoder::new(),
            ready: std::collections::VecDeque::new(),
            chunk: vec![0u8; READ_CHUNK].into_boxed_slice(),
            eof: false,
        }
    }

    /// Next parsed line, or `Ok(None)` once the stream is exhausted.
    pub async fn next_item(&mut self) -> Result<Option<StreamItem>> {
        loop {
            if let Some(line) = self.ready.pop_front() {
                return Ok(Some(parse_line(&line)));
            }
            if self.eof {
                return Ok(None);
            }

            let n = self.reader.read(&mut self.chunk[..]).await?;
            if n == 0 {
                self.eof = true;
                if let Some(rest) = self.decoder.finish() {
                    self.ready.push_back(rest);
                }
            } else {
                self.ready.extend(self.decoder.push(&self.chunk[..n]));
            }
        }
    }

    /// Next recognised event, skipping noise.
    pub async fn next_event(&mut self) -> Result<Option<Message>> {
        while let Some(item) = self.next_item().await? {
            if let StreamItem::Event(msg) = item {
                return Ok(Some(msg));
            }
        }
        Ok(None)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────
