// Length-prefixed framing over TCP.
//
// Each frame is a 4-byte unsigned big-endian length followed by that many
// bytes of UTF-8 JSON. EOF in the middle of a frame is a transport error;
// EOF on a frame boundary is a clean close.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{LedgerError, Result};

use super::Message;

/// Maximum frame size (16MB) - prevents memory exhaustion from hostile
/// or corrupt length prefixes.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Writes one framed message and flushes the stream.
pub async fn write_message<W>(writer: &mut W, message: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(message)?;
    if body.len() > MAX_FRAME_SIZE {
        return Err(LedgerError::Protocol(format!(
            "outgoing frame too large: {} bytes (max: {})",
            body.len(),
            MAX_FRAME_SIZE
        )));
    }

    let len = (body.len() as u32).to_be_bytes();
    writer
        .write_all(&len)
        .await
        .map_err(|e| LedgerError::Network(e.to_string()))?;
    writer
        .write_all(&body)
        .await
        .map_err(|e| LedgerError::Network(e.to_string()))?;
    writer
        .flush()
        .await
        .map_err(|e| LedgerError::Network(e.to_string()))?;
    Ok(())
}

/// Reads one framed message, or `None` if the peer closed the connection
/// cleanly before sending another frame.
pub async fn read_message_opt<R>(reader: &mut R) -> Result<Option<Message>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        let n = reader
            .read(&mut len_buf[filled..])
            .await
            .map_err(|e| LedgerError::Network(e.to_string()))?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(LedgerError::Protocol(
                "connection closed mid-frame".to_string(),
            ));
        }
        filled += n;
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(LedgerError::Protocol(format!(
            "incoming frame too large: {} bytes (max: {})",
            len, MAX_FRAME_SIZE
        )));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            LedgerError::Protocol("connection closed mid-frame".to_string())
        } else {
            LedgerError::Network(e.to_string())
        }
    })?;

    Ok(Some(serde_json::from_slice(&body)?))
}

/// Reads one framed message, treating any close as an error.
pub async fn read_message<R>(reader: &mut R) -> Result<Message>
where
    R: AsyncRead + Unpin,
{
    read_message_opt(reader)
        .await?
        .ok_or_else(|| LedgerError::Protocol("connection closed before a frame".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        let msg = Message::Read {
            account_id: "A".to_string(),
        };
        write_message(&mut client, &msg).await.unwrap();

        let received = read_message(&mut server).await.unwrap();
        match received {
            Message::Read { account_id } => assert_eq!(account_id, "A"),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_clean_eof_yields_none() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);
        assert!(read_message_opt(&mut server).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eof_mid_frame_is_an_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        // Length prefix promising 100 bytes, then close without a body.
        client.write_all(&100u32.to_be_bytes()).await.unwrap();
        drop(client);

        let err = read_message_opt(&mut server).await.unwrap_err();
        assert!(matches!(err, LedgerError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let len = (MAX_FRAME_SIZE as u32 + 1).to_be_bytes();
        client.write_all(&len).await.unwrap();

        let err = read_message_opt(&mut server).await.unwrap_err();
        assert!(matches!(err, LedgerError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_invalid_json_is_a_serialization_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let body = b"not json";
        client
            .write_all(&(body.len() as u32).to_be_bytes())
            .await
            .unwrap();
        client.write_all(body).await.unwrap();

        let err = read_message_opt(&mut server).await.unwrap_err();
        assert!(matches!(err, LedgerError::Serialization(_)));
    }
}
