use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Two-byte terminator separating messages on the wire. Payloads must not
/// contain it; everything else, including a bare `\n`, is legal.
pub const DELIMITER: &[u8] = b"\r\n";

/// Reads one delimited message, with the delimiter stripped. `Ok(None)` means
/// the stream ended cleanly before any byte arrived; a stream that ends in
/// the middle of a message is an error. Both end the session for callers.
pub async fn read_message<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buffer = Vec::new();
    loop {
        let bytes = reader.read_until(b'\n', &mut buffer).await?;
        if bytes == 0 {
            if buffer.is_empty() {
                return Ok(None);
            }
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stream closed before message delimiter",
            ));
        }

        // A lone '\n' inside the payload keeps accumulating until CR LF shows up.
        if buffer.ends_with(DELIMITER) {
            buffer.truncate(buffer.len() - DELIMITER.len());
            return String::from_utf8(buffer)
                .map(Some)
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err));
        }
    }
}

/// Writes one message, appends the delimiter, and flushes so peers see it
/// without waiting for more traffic.
pub async fn write_message<W>(writer: &mut W, message: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(message.as_bytes()).await?;
    writer.write_all(DELIMITER).await?;
    writer.flush().await?;
    Ok(())
}
