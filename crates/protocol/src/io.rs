/*
 * vSMTP mail transfer agent
 *
 * Copyright (C) 2003 - viridIT SAS
 * Licensed under the Elastic License 2.0
 *
 * You should have received a copy of the Elastic License 2.0 along with
 * this program. If not, see https://www.elastic.co/licensing/elastic-license.
 *
 */

use crate::{ProtocolError, Reply};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt};

/// Lines longer than this are a protocol violation, not a legitimate
/// command or reply.
const MAX_LINE_LEN: usize = 8192;

/// Buffered, CRLF-aware reader shared by the receiver (reading commands)
/// and the delivery client (reading replies).
pub struct Reader<R> {
    inner: tokio::io::BufReader<R>,
}

impl<R: AsyncRead + Unpin> Reader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: tokio::io::BufReader::new(inner),
        }
    }

    /// Reads one CRLF- or LF-terminated line, with the terminator
    /// stripped. An empty read (EOF before any byte) is reported as a
    /// closed connection.
    pub async fn read_line(&mut self) -> Result<String, ProtocolError> {
        let mut line = String::new();
        let n = self.inner.read_line(&mut line).await?;
        if n == 0 {
            return Err(ProtocolError::ConnectionClosed);
        }
        while matches!(line.chars().last(), Some('\n' | '\r')) {
            line.pop();
        }
        if line.len() > MAX_LINE_LEN {
            return Err(ProtocolError::LineTooLong);
        }
        Ok(line)
    }

    /// Reads one full (possibly multi-line) SMTP reply.
    pub async fn read_reply(&mut self) -> Result<Reply, ProtocolError> {
        let mut text = String::new();
        loop {
            let line = self.read_line().await?;
            let continuation = line.as_bytes().get(3) == Some(&b'-');
            text.push_str(&line);
            text.push_str("\r\n");
            if !continuation {
                break;
            }
        }
        Ok(text.parse()?)
    }

    /// Reads a `DATA` body up to (and consuming) the terminating
    /// `.\r\n` line, undoing RFC 5321 dot-transparency and enforcing
    /// `max_size`.
    pub async fn read_data(&mut self, max_size: u64) -> Result<Vec<u8>, ProtocolError> {
        let mut body = Vec::new();
        loop {
            let line = self.read_line().await?;
            if line == "." {
                break;
            }
            let content = line.strip_prefix('.').unwrap_or(&line);
            body.extend_from_slice(content.as_bytes());
            body.extend_from_slice(b"\r\n");
            if body.len() as u64 > max_size {
                return Err(ProtocolError::LineTooLong);
            }
        }
        Ok(body)
    }

    pub fn into_inner(self) -> R {
        self.inner.into_inner()
    }
}

/// Plain async writer for commands, replies, and dot-stuffed message
/// bodies.
pub struct Writer<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> Writer<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn write_line(&mut self, line: &str) -> Result<(), ProtocolError> {
        self.inner.write_all(line.as_bytes()).await?;
        self.inner.write_all(b"\r\n").await?;
        Ok(())
    }

    pub async fn write_reply(&mut self, reply: &Reply) -> Result<(), ProtocolError> {
        self.inner.write_all(reply.to_string().as_bytes()).await?;
        Ok(())
    }

    /// Writes a `DATA` body, applying RFC 5321 dot-transparency and the
    /// terminating `.\r\n`. `message` is expected to already use CRLF
    /// line endings.
    pub async fn write_data(&mut self, message: &[u8]) -> Result<(), ProtocolError> {
        for line in message.split(|&b| b == b'\n') {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if line.starts_with(b".") {
                self.inner.write_all(b".").await?;
            }
            self.inner.write_all(line).await?;
            self.inner.write_all(b"\r\n").await?;
        }
        self.inner.write_all(b".\r\n").await?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::{Reader, Writer};

    #[tokio::test]
    async fn read_line_strips_crlf() {
        let mut reader = Reader::new(std::io::Cursor::new(b"EHLO example.com\r\n".to_vec()));
        assert_eq!(reader.read_line().await.unwrap(), "EHLO example.com");
    }

    #[tokio::test]
    async fn read_data_undoes_dot_stuffing() {
        let mut reader = Reader::new(std::io::Cursor::new(b"..leading dot\r\nplain\r\n.\r\n".to_vec()));
        let body = reader.read_data(1024).await.unwrap();
        assert_eq!(body, b".leading dot\r\nplain\r\n");
    }

    #[tokio::test]
    async fn write_data_stuffs_leading_dots() {
        let mut writer = Writer::new(Vec::new());
        writer.write_data(b".leading\r\nplain\r\n").await.unwrap();
        assert_eq!(writer.into_inner(), b"..leading\r\nplain\r\n.\r\n");
    }
}
