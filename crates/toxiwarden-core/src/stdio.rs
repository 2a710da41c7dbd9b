use crate::process::{ProcessEvent, ProcessEventSender};
use std::io;
use tokio::io::AsyncRead;
use tokio_stream::StreamExt;
use tokio_util::bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, FramedRead};

/// Which standard stream a chunk of output came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Stdout,
    Stderr,
}

impl OutputKind {
    fn event(self, text: String) -> ProcessEvent {
        match self {
            OutputKind::Stdout => ProcessEvent::Stdout(text),
            OutputKind::Stderr => ProcessEvent::Stderr(text),
        }
    }
}

/// Decodes whatever complete UTF-8 is buffered, holding back a trailing
/// partial code point until the rest of it arrives. Invalid sequences
/// become U+FFFD.
struct Utf8Codec;

impl Decoder for Utf8Codec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        let consumed = match std::str::from_utf8(src) {
            Ok(_) => src.len(),
            Err(e) => match e.error_len() {
                // Truncated code point at the end: wait for more bytes
                None if e.valid_up_to() == 0 => return Ok(None),
                None => e.valid_up_to(),
                Some(invalid) => e.valid_up_to() + invalid,
            },
        };

        let out = String::from_utf8_lossy(&src[..consumed]).into_owned();
        src.advance(consumed);
        Ok(Some(out))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(out) => Ok(Some(out)),
            None if src.is_empty() => Ok(None),
            None => {
                // A code point the stream never finished
                let out = String::from_utf8_lossy(src).into_owned();
                src.clear();
                Ok(Some(out))
            }
        }
    }
}

/// Forward a process stream into its event channel until EOF.
///
/// Once the channel is closed the stream is still drained, so the process
/// never writes into a pipe nobody reads.
pub async fn forward_output<R: AsyncRead + Unpin>(
    io: R,
    kind: OutputKind,
    events: ProcessEventSender,
) -> io::Result<()> {
    let mut frames = FramedRead::with_capacity(io, Utf8Codec, 1024);
    let mut listening = true;

    while let Some(frame) = frames.next().await {
        let text = frame?;
        if listening && events.send(kind.event(text)).is_err() {
            listening = false;
        }
    }

    Ok(())
}
