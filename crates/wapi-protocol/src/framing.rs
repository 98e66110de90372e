//! Length-prefixed framing for [`Message`] over any duplex byte stream.
//!
//! Replaces in-process pickling over a `multiprocessing.Pipe` with
//! length-prefixed tagged byte frames over a duplex pipe. A `u32`
//! big-endian length prefix precedes each postcard-encoded message.

use crate::message::Message;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use wapi_common::{Result, WApiError};

const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

pub async fn write_frame<W: AsyncWriteExt + Unpin>(w: &mut W, msg: &Message) -> Result<()> {
    let body = msg.encode()?;
    let len: u32 = body
        .len()
        .try_into()
        .map_err(|_| WApiError::MalformedMessage("frame too large to encode".to_string()))?;
    w.write_all(&len.to_be_bytes()).await?;
    w.write_all(&body).await?;
    Ok(())
}

/// Reads one frame. `Ok(None)` signals a clean EOF (the peer closed the
/// channel before a new frame started).
pub async fn read_frame<R: AsyncReadExt + Unpin>(r: &mut R) -> Result<Option<Message>> {
    let mut len_buf = [0u8; 4];
    match r.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(WApiError::MalformedMessage(format!(
            "frame length {len} exceeds max {MAX_FRAME_LEN}"
        )));
    }
    let mut body = vec![0u8; len as usize];
    r.read_exact(&mut body).await?;
    Message::decode(&body).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_through_an_in_memory_duplex() {
        let (mut a, mut b) = tokio::io::duplex(4096);

        write_frame(&mut a, &Message::Exit).await.unwrap();
        let received = read_frame(&mut b).await.unwrap();
        assert_eq!(received.unwrap().type_name(), "exit");
    }

    #[tokio::test]
    async fn read_frame_reports_clean_eof() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);
        let received = read_frame(&mut b).await.unwrap();
        assert!(received.is_none());
    }
}
