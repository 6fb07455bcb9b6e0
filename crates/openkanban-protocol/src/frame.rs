//! Binary length-prefixed framing for the local (Unix-socket) daemon protocol.
//!
//! Wire format: `[type:1][length:4 BE][payload:length bytes]`. All multi-byte
//! integers are big-endian. A frame's payload must never exceed
//! [`MAX_FRAME_LEN`]; encoders and decoders both enforce this.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::errors::FrameError;

/// Largest payload a single frame may carry (1 MiB).
pub const MAX_FRAME_LEN: u32 = 1024 * 1024;

/// Message type tags. Values above `0x7f` are reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Raw terminal bytes, either direction.
    Data,
    /// Client -> server: new terminal size, payload `rows:2 cols:2` (BE).
    Resize,
    /// Server -> client: session has exited. Empty payload.
    Exit,
    /// Client -> server: attach to an existing session. Payload: session id (UTF-8).
    Attach,
    /// Client -> server: create-or-attach a session. Payload: NUL-separated
    /// `session_id, workdir, command, arg1, arg2, ...`.
    Create,
    /// Server -> client: last control op succeeded. Empty payload.
    SessionOk,
    /// Server -> client: last control op failed. Payload: UTF-8 message.
    SessionError,
    /// Client -> server: stop receiving output for the attached session. Empty payload.
    Detach,
    /// Client -> server: request the list of running session ids. Empty payload.
    List,
    /// Server -> client: NUL-separated list of running session ids.
    ListResponse,
    /// Reserved for forward-compatible server -> client messages a client
    /// doesn't recognize yet. Clients MUST ignore frames of unknown type;
    /// this variant exists so decode can surface one without failing the
    /// connection outright.
    Unknown(u8),
}

impl MessageType {
    fn to_byte(self) -> u8 {
        match self {
            MessageType::Data => 0x01,
            MessageType::Resize => 0x02,
            MessageType::Exit => 0x03,
            MessageType::Attach => 0x10,
            MessageType::Create => 0x11,
            MessageType::SessionOk => 0x12,
            MessageType::SessionError => 0x13,
            MessageType::Detach => 0x14,
            MessageType::List => 0x15,
            MessageType::ListResponse => 0x16,
            MessageType::Unknown(b) => b,
        }
    }

    fn from_byte(b: u8) -> Self {
        match b {
            0x01 => MessageType::Data,
            0x02 => MessageType::Resize,
            0x03 => MessageType::Exit,
            0x10 => MessageType::Attach,
            0x11 => MessageType::Create,
            0x12 => MessageType::SessionOk,
            0x13 => MessageType::SessionError,
            0x14 => MessageType::Detach,
            0x15 => MessageType::List,
            0x16 => MessageType::ListResponse,
            other => MessageType::Unknown(other),
        }
    }

    /// True for types servers may legally send that an older client might
    /// not recognize yet — those get ignored rather than tearing down the
    /// connection.
    pub fn is_server_to_client(self) -> bool {
        matches!(
            self,
            MessageType::Data
                | MessageType::Exit
                | MessageType::SessionOk
                | MessageType::SessionError
                | MessageType::ListResponse
                | MessageType::Unknown(_)
        )
    }
}

/// A decoded frame: its type tag plus raw payload bytes.
#[derive(Debug, Clone)]
pub struct Frame {
    pub msg_type: MessageType,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(msg_type: MessageType, payload: Vec<u8>) -> Self {
        Self { msg_type, payload }
    }

    pub fn empty(msg_type: MessageType) -> Self {
        Self {
            msg_type,
            payload: Vec::new(),
        }
    }

    /// Split a [`MessageType::Create`] payload into `(session_id, workdir, command, args)`.
    ///
    /// Fields are NUL-separated; `args` is whatever NUL-separated fields
    /// remain after the first three.
    pub fn decode_create_payload(&self) -> Result<(String, String, String, Vec<String>), FrameError> {
        let text = std::str::from_utf8(&self.payload)
            .map_err(|_| FrameError::InvalidPayload("CREATE payload is not valid UTF-8".into()))?;
        let mut parts = text.split('\0');
        let session_id = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| FrameError::InvalidPayload("CREATE missing session id".into()))?
            .to_string();
        let workdir = parts
            .next()
            .ok_or_else(|| FrameError::InvalidPayload("CREATE missing workdir".into()))?
            .to_string();
        let command = parts
            .next()
            .ok_or_else(|| FrameError::InvalidPayload("CREATE missing command".into()))?
            .to_string();
        let args = parts.map(|s| s.to_string()).collect();
        Ok((session_id, workdir, command, args))
    }

    /// Encode `(session_id, workdir, command, args)` into a [`MessageType::Create`] frame.
    pub fn encode_create(session_id: &str, workdir: &str, command: &str, args: &[String]) -> Frame {
        let mut fields = vec![session_id.to_string(), workdir.to_string(), command.to_string()];
        fields.extend(args.iter().cloned());
        Frame::new(MessageType::Create, fields.join("\0").into_bytes())
    }

    /// Decode a [`MessageType::Resize`] payload into `(rows, cols)`.
    pub fn decode_resize_payload(&self) -> Result<(u16, u16), FrameError> {
        if self.payload.len() != 4 {
            return Err(FrameError::InvalidPayload(format!(
                "RESIZE payload must be 4 bytes, got {}",
                self.payload.len()
            )));
        }
        let rows = u16::from_be_bytes([self.payload[0], self.payload[1]]);
        let cols = u16::from_be_bytes([self.payload[2], self.payload[3]]);
        Ok((rows, cols))
    }

    pub fn encode_resize(rows: u16, cols: u16) -> Frame {
        let mut payload = Vec::with_capacity(4);
        payload.extend_from_slice(&rows.to_be_bytes());
        payload.extend_from_slice(&cols.to_be_bytes());
        Frame::new(MessageType::Resize, payload)
    }

    /// Decode a [`MessageType::ListResponse`] payload into session ids.
    pub fn decode_list_response_payload(&self) -> Result<Vec<String>, FrameError> {
        if self.payload.is_empty() {
            return Ok(Vec::new());
        }
        let text = std::str::from_utf8(&self.payload)
            .map_err(|_| FrameError::InvalidPayload("LIST_RESPONSE payload is not valid UTF-8".into()))?;
        Ok(text.split('\0').map(|s| s.to_string()).collect())
    }

    pub fn encode_list_response(ids: &[String]) -> Frame {
        Frame::new(MessageType::ListResponse, ids.join("\0").into_bytes())
    }

    pub fn decode_text_payload(&self) -> Result<String, FrameError> {
        String::from_utf8(self.payload.clone())
            .map_err(|_| FrameError::InvalidPayload("payload is not valid UTF-8".into()))
    }
}

/// Write a single frame to `writer`. Fails if `frame.payload.len()` exceeds
/// [`MAX_FRAME_LEN`] — callers should never construct an oversized frame,
/// but this guards against it rather than silently truncating.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Frame) -> Result<(), FrameError> {
    let len = frame.payload.len();
    if len > MAX_FRAME_LEN as usize {
        return Err(FrameError::FrameTooLarge(len));
    }
    writer.write_u8(frame.msg_type.to_byte()).await?;
    writer.write_u32(len as u32).await?;
    if !frame.payload.is_empty() {
        writer.write_all(&frame.payload).await?;
    }
    writer.flush().await?;
    Ok(())
}

/// Read a single frame from `reader`.
///
/// Returns `Ok(None)` on a clean EOF before any byte of the next frame has
/// arrived (i.e. the peer closed the connection between frames). An EOF
/// that interrupts a frame already in progress is reported as
/// [`FrameError::ShortRead`].
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Frame>, FrameError> {
    let type_byte = match reader.read_u8().await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let len = reader
        .read_u32()
        .await
        .map_err(|e| short_read_or(e, "frame length"))?;
    if len > MAX_FRAME_LEN {
        return Err(FrameError::FrameTooLarge(len as usize));
    }
    let mut payload = vec![0u8; len as usize];
    if len > 0 {
        reader
            .read_exact(&mut payload)
            .await
            .map_err(|e| short_read_or(e, "frame payload"))?;
    }
    Ok(Some(Frame::new(MessageType::from_byte(type_byte), payload)))
}

fn short_read_or(e: std::io::Error, what: &str) -> FrameError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        FrameError::ShortRead(what.to_string())
    } else {
        FrameError::Io(e)
    }
}
