use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::http::response::Response;

fn serialize_response(resp: &Response) -> Vec<u8> {
    let mut buf = Vec::with_capacity(128 + resp.body.len());

    // Status line
    let status_line = format!(
        "{} {} {}\r\n",
        resp.version,
        resp.status.as_u16(),
        resp.status.reason_phrase()
    );
    buf.extend_from_slice(status_line.as_bytes());

    // Headers
    for (k, v) in resp.headers.iter() {
        buf.extend_from_slice(k.as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(v.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }

    // Header/body separator
    buf.extend_from_slice(b"\r\n");

    // Body
    buf.extend_from_slice(&resp.body);

    buf
}

/// A response serialized and waiting to go out on the wire.
pub struct ResponseWriter {
    buffer: Vec<u8>,
    written: usize,
    need_eof: bool,
}

impl ResponseWriter {
    /// Finalizes framing on `response` and serializes it.
    pub fn new(response: &mut Response) -> Self {
        response.prepare_payload();
        let need_eof = response.need_eof();

        Self {
            buffer: serialize_response(response),
            written: 0,
            need_eof,
        }
    }

    /// Whether the connection must close once this response is written.
    pub fn need_eof(&self) -> bool {
        self.need_eof
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.written
    }

    pub async fn write_to_stream<W>(&mut self, stream: &mut W) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        while self.written < self.buffer.len() {
            let n = stream.write(&self.buffer[self.written..]).await?;

            if n == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "connection closed while writing",
                ));
            }

            self.written += n;
        }

        stream.flush().await
    }
}

/// Writes `response` to `stream` and reports whether the connection has to
/// close afterwards.
///
/// The close flag is decided from the response's framing before any byte
/// goes out, so it is meaningful even when the write fails part way.
pub async fn send<W>(stream: &mut W, response: &mut Response) -> std::io::Result<bool>
where
    W: AsyncWrite + Unpin,
{
    let mut writer = ResponseWriter::new(response);
    let close = writer.need_eof();
    writer.write_to_stream(stream).await?;
    Ok(close)
}
