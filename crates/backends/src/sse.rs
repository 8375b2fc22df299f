//! Byte-level line splitting for SSE streams.
//!
//! Network chunks can cut a multi-byte UTF-8 character in half, so lines are
//! accumulated as bytes and decoded only once a full line is present. The
//! incomplete tail past the last newline stays buffered until the next chunk
//! completes it.

pub(crate) struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub(crate) fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub(crate) fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop the next complete line, without its `\n` (or `\r\n`) terminator.
    /// Returns `None` until a newline arrives.
    pub(crate) fn next_line(&mut self) -> Option<String> {
        let end = self.buf.iter().position(|&b| b == b'\n')?;
        let drained: Vec<u8> = self.buf.drain(..=end).collect();
        let mut line = &drained[..end];
        if line.last() == Some(&b'\r') {
            line = &line[..line.len() - 1];
        }
        Some(String::from_utf8_lossy(line).into_owned())
    }
}

/// Serves one canned SSE response over a raw socket, writing the body in the
/// given pieces with a pause between them so the client sees them as separate
/// network chunks. The connection closes after the last piece.
#[cfg(test)]
pub(crate) async fn serve_once(pieces: Vec<Vec<u8>>) -> std::net::SocketAddr {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            request.extend_from_slice(&buf[..n]);
            if request.windows(4).any(|w| w == b"\r\n\r\n") && request.last() == Some(&b'}') {
                break;
            }
        }

        socket
            .write_all(
                b"HTTP/1.1 200 OK\r\n\
                  Content-Type: text/event-stream\r\n\
                  Connection: close\r\n\r\n",
            )
            .await
            .unwrap();
        for piece in pieces {
            socket.write_all(&piece).await.unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        }
    });

    addr
}
