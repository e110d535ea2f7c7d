//! Text event-stream framing shared by the server broadcaster and the sync client.

use std::io;

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Longest line accepted by the decoder.
const MAX_LINE_LEN: usize = 1 << 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    /// `event: <event>\ndata: <data>\n\n`
    Event { event: String, data: String },
    /// `: <text>\n\n`, carries no data and exists to keep the transport alive.
    Comment(String),
}

impl SseFrame {
    pub fn event(event: &str, data: impl Into<String>) -> Self {
        SseFrame::Event {
            event: event.to_string(),
            data: data.into(),
        }
    }

    pub fn heartbeat() -> Self {
        SseFrame::Comment("heartbeat".into())
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        // Encoding into memory cannot fail.
        let _ = SseCodec::default().encode(self.clone(), &mut buf);
        buf.freeze()
    }
}

#[derive(Debug, Default)]
pub struct SseCodec {
    event: Option<String>,
    data: Vec<String>,
}

impl SseCodec {
    fn take_pending(&mut self) -> Option<SseFrame> {
        if self.event.is_none() && self.data.is_empty() {
            return None;
        }
        let event = self.event.take().unwrap_or_else(|| "message".to_string());
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseFrame::Event { event, data })
    }
}

impl Encoder<SseFrame> for SseCodec {
    type Error = io::Error;

    fn encode(&mut self, frame: SseFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match frame {
            SseFrame::Event { event, data } => {
                if event.contains('\n') {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "event name contains a newline",
                    ));
                }
                dst.put_slice(b"event: ");
                dst.put_slice(event.as_bytes());
                dst.put_u8(b'\n');
                for line in data.split('\n') {
                    dst.put_slice(b"data: ");
                    dst.put_slice(line.as_bytes());
                    dst.put_u8(b'\n');
                }
                dst.put_u8(b'\n');
            }
            SseFrame::Comment(text) => {
                for line in text.split('\n') {
                    dst.put_slice(b": ");
                    dst.put_slice(line.as_bytes());
                    dst.put_u8(b'\n');
                }
                dst.put_u8(b'\n');
            }
        }
        Ok(())
    }
}

impl Decoder for SseCodec {
    type Item = SseFrame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(nl) = src.iter().position(|b| *b == b'\n') else {
                if src.len() > MAX_LINE_LEN {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "event stream line too long",
                    ));
                }
                return Ok(None);
            };
            let raw = src.split_to(nl + 1);
            let line = std::str::from_utf8(&raw[..nl])
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            let line = line.strip_suffix('\r').unwrap_or(line);

            if line.is_empty() {
                if let Some(frame) = self.take_pending() {
                    return Ok(Some(frame));
                }
                continue;
            }

            if let Some(comment) = line.strip_prefix(':') {
                // Comments inside an event block are dropped; standalone ones surface.
                if self.event.is_none() && self.data.is_empty() {
                    return Ok(Some(SseFrame::Comment(comment.trim_start().to_string())));
                }
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                // id, retry and unknown fields carry nothing we use.
                _ => {}
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        // A trailing partial frame is discarded.
        src.clear();
        self.event = None;
        self.data.clear();
        Ok(None)
    }
}
