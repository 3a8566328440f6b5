use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use super::frame::{
    apply_mask, close_payload, encode_frame, read_header, CloseCode, FrameHeader, Opcode,
    MAX_CONTROL_PAYLOAD,
};
use super::handshake;
use crate::error::TransportError;
use crate::transport::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingHandshake,
    Open,
    /// We sent a close frame and are waiting for the echo.
    Closing,
    Closed,
}

#[derive(Debug, Clone)]
pub struct SessionLimits {
    pub subprotocol: Arc<str>,
    pub max_header_bytes: usize,
    pub max_frame_bytes: u64,
    pub close_timeout: Duration,
}

/// One WebSocket connection, generic over its two stream halves.
pub struct WsSession<R, W> {
    reader: R,
    writer: W,
    state: SessionState,
    limits: SessionLimits,
}

impl<R, W> WsSession<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W, limits: SessionLimits) -> Self {
        Self {
            reader,
            writer,
            state: SessionState::AwaitingHandshake,
            limits,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Answer the client's upgrade request. On rejection the 400 has been
    /// sent and the stream is shut down.
    pub async fn handshake(&mut self) -> Result<()> {
        if self.state != SessionState::AwaitingHandshake {
            return Err(TransportError::Closed);
        }

        let outcome = handshake::accept(
            &mut self.reader,
            &mut self.writer,
            &self.limits.subprotocol,
            self.limits.max_header_bytes,
        )
        .await;

        match outcome {
            Ok(_) => {
                self.state = SessionState::Open;
                Ok(())
            }
            Err(e) => {
                let _ = self.writer.shutdown().await;
                self.state = SessionState::Closed;
                Err(e.into())
            }
        }
    }

    /// Read frames until one complete text message has arrived. Payload past
    /// `max_len` is read and discarded.
    pub async fn recv_message(&mut self, max_len: usize) -> Result<Vec<u8>> {
        if self.state != SessionState::Open {
            return Err(TransportError::Closed);
        }

        let mut message: Option<Vec<u8>> = None;
        loop {
            let header = match read_header(&mut self.reader).await {
                Ok(header) => header,
                Err(e) => return Err(self.lost(e)),
            };
            trace!(opcode = ?header.opcode, len = header.payload_len, fin = header.fin, "frame");

            if header.rsv != 0 {
                return Err(self.fail(CloseCode::ProtocolError, "reserved bits set").await);
            }
            let Some(mask) = header.mask else {
                return Err(self.fail(CloseCode::ProtocolError, "unmasked client frame").await);
            };
            if header.payload_len > self.limits.max_frame_bytes {
                return Err(self.fail(CloseCode::MessageTooBig, "frame too large").await);
            }

            if header.opcode.is_control() {
                if header.payload_len > MAX_CONTROL_PAYLOAD as u64 || !header.fin {
                    return Err(self.fail(CloseCode::ProtocolError, "bad control frame").await);
                }
                let payload = self.read_payload(&header, mask).await?;
                self.on_control(header.opcode, payload).await?;
                continue;
            }

            match (header.opcode, message.is_some()) {
                (Opcode::Text, false) => message = Some(Vec::new()),
                (Opcode::Continuation, true) => {}
                (Opcode::Continuation, false) => {
                    return Err(self
                        .fail(CloseCode::ProtocolError, "continuation without initial frame")
                        .await)
                }
                (Opcode::Text, true) => {
                    return Err(self
                        .fail(CloseCode::ProtocolError, "new message before the last one finished")
                        .await)
                }
                (Opcode::Binary, _) => {
                    return Err(self.fail(CloseCode::UnsupportedData, "binary message").await)
                }
                _ => return Err(self.fail(CloseCode::ProtocolError, "unknown opcode").await),
            }

            let buffer = message.get_or_insert_with(Vec::new);
            self.read_into(&header, mask, buffer, max_len).await?;
            if header.fin {
                return Ok(message.unwrap_or_default());
            }
        }
    }

    async fn read_payload(&mut self, header: &FrameHeader, mask: [u8; 4]) -> Result<Vec<u8>> {
        let mut payload = vec![0u8; header.payload_len as usize];
        if let Err(e) = self.reader.read_exact(&mut payload).await {
            return Err(self.lost(e));
        }
        apply_mask(&mut payload, mask, 0);
        Ok(payload)
    }

    /// Append up to `max_len - buffer.len()` unmasked bytes; drain the rest.
    async fn read_into(
        &mut self,
        header: &FrameHeader,
        mask: [u8; 4],
        buffer: &mut Vec<u8>,
        max_len: usize,
    ) -> Result<()> {
        let room = max_len.saturating_sub(buffer.len()) as u64;
        let keep = header.payload_len.min(room) as usize;

        let start = buffer.len();
        buffer.resize(start + keep, 0);
        if let Err(e) = self.reader.read_exact(&mut buffer[start..]).await {
            return Err(self.lost(e));
        }
        apply_mask(&mut buffer[start..], mask, 0);

        let excess = header.payload_len - keep as u64;
        if excess > 0 {
            let mut sink = tokio::io::sink();
            let mut rest = (&mut self.reader).take(excess);
            match tokio::io::copy(&mut rest, &mut sink).await {
                Ok(n) if n == excess => {}
                Ok(_) => return Err(self.lost(std::io::ErrorKind::UnexpectedEof.into())),
                Err(e) => return Err(self.lost(e)),
            }
        }
        Ok(())
    }

    async fn on_control(&mut self, opcode: Opcode, payload: Vec<u8>) -> Result<()> {
        match opcode {
            Opcode::Ping => {
                self.write_frame(Opcode::Pong, &payload).await?;
                Ok(())
            }
            Opcode::Pong => Ok(()),
            Opcode::Close => {
                // Echo the status code back, then we're done.
                let echo = if payload.len() >= 2 { &payload[..2] } else { &[][..] };
                let _ = self.write_frame(Opcode::Close, echo).await;
                let _ = self.writer.shutdown().await;
                self.state = SessionState::Closed;
                debug!("peer closed the connection");
                Err(TransportError::Closed)
            }
            _ => Err(self.fail(CloseCode::ProtocolError, "unknown opcode").await),
        }
    }

    pub async fn send_text(&mut self, text: &[u8]) -> Result<()> {
        if self.state != SessionState::Open {
            return Err(TransportError::Closed);
        }
        self.write_frame(Opcode::Text, text).await
    }

    async fn write_frame(&mut self, opcode: Opcode, payload: &[u8]) -> Result<()> {
        let frame = encode_frame(true, opcode, payload, None);
        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Send a normal close, wait up to the close timeout for the echo, then
    /// shut the stream down. Does nothing on a closed session.
    pub async fn close(&mut self) {
        match self.state {
            SessionState::Closed => return,
            SessionState::AwaitingHandshake => {
                let _ = self.writer.shutdown().await;
                self.state = SessionState::Closed;
                return;
            }
            SessionState::Open | SessionState::Closing => {}
        }

        if self.state == SessionState::Open {
            let payload = close_payload(CloseCode::Normal.code());
            if self.write_frame(Opcode::Close, &payload).await.is_ok() {
                self.state = SessionState::Closing;
                let timeout = self.limits.close_timeout;
                if tokio::time::timeout(timeout, self.await_close_echo())
                    .await
                    .is_err()
                {
                    debug!("peer did not echo close in time");
                }
            }
        }

        let _ = self.writer.shutdown().await;
        self.state = SessionState::Closed;
    }

    async fn await_close_echo(&mut self) {
        loop {
            let Ok(header) = read_header(&mut self.reader).await else {
                return;
            };
            let mut rest = (&mut self.reader).take(header.payload_len);
            if tokio::io::copy(&mut rest, &mut tokio::io::sink()).await.is_err() {
                return;
            }
            if header.opcode == Opcode::Close {
                return;
            }
        }
    }

    /// Close with `code` after a protocol violation and report it.
    async fn fail(&mut self, code: CloseCode, reason: &'static str) -> TransportError {
        debug!(code = code.code(), reason, "closing websocket");
        let _ = self
            .write_frame(Opcode::Close, &close_payload(code.code()))
            .await;
        let _ = self.writer.shutdown().await;
        self.state = SessionState::Closed;
        TransportError::Protocol {
            code: code.code(),
            reason,
        }
    }

    /// The stream broke under us.
    fn lost(&mut self, e: std::io::Error) -> TransportError {
        self.state = SessionState::Closed;
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            TransportError::Closed
        } else {
            TransportError::Io(e)
        }
    }
}
