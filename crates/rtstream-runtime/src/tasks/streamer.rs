//! Highest-priority task: moves one chunk from the source to the transport
//! every cycle, or silence while paused.

use crate::pause::PauseState;
use crate::periodic::CycleBody;
use rtstream_common::error::{Endpoint, RtError, RtResult};
use std::io::{ErrorKind, Read, Write};
use tracing::trace;

/// Streams fixed-size chunks from a source to a transport.
pub struct AudioStreamer<'a, R, W> {
    source: R,
    transport: W,
    pause: &'a PauseState,
    buffer: Vec<u8>,
    chunks_sent: u64,
    silent_chunks: u64,
}

impl<'a, R: Read, W: Write> AudioStreamer<'a, R, W> {
    /// Create a streamer moving `chunk_size` bytes per cycle.
    pub fn new(source: R, transport: W, pause: &'a PauseState, chunk_size: usize) -> Self {
        Self {
            source,
            transport,
            pause,
            buffer: vec![0; chunk_size],
            chunks_sent: 0,
            silent_chunks: 0,
        }
    }

    /// Bytes written per cycle.
    pub fn chunk_size(&self) -> usize {
        self.buffer.len()
    }

    /// Chunks written so far, silent ones included.
    pub fn chunks_sent(&self) -> u64 {
        self.chunks_sent
    }

    /// Zero chunks written while paused.
    pub fn silent_chunks(&self) -> u64 {
        self.silent_chunks
    }

    /// Give back the endpoints.
    pub fn into_parts(self) -> (R, W) {
        (self.source, self.transport)
    }

    /// Send one chunk.
    ///
    /// While paused the source is left untouched and zeros are sent. An
    /// exhausted source, a failed read, a failed write or a short write are
    /// all terminal.
    ///
    /// # Errors
    ///
    /// Returns [`RtError::IoFailure`] naming the failing endpoint.
    pub fn stream_chunk(&mut self) -> RtResult<()> {
        let paused = self.pause.is_paused();
        if paused {
            self.buffer.fill(0);
        } else {
            self.source.read_exact(&mut self.buffer).map_err(|err| {
                if err.kind() == ErrorKind::UnexpectedEof {
                    RtError::IoFailure {
                        endpoint: Endpoint::Source,
                        reason: "source exhausted".to_string(),
                    }
                } else {
                    RtError::io(Endpoint::Source, &err)
                }
            })?;
        }

        let written = self
            .transport
            .write(&self.buffer)
            .map_err(|err| RtError::io(Endpoint::Transport, &err))?;
        if written != self.buffer.len() {
            return Err(RtError::IoFailure {
                endpoint: Endpoint::Transport,
                reason: format!("short write: {written} of {} bytes", self.buffer.len()),
            });
        }

        self.chunks_sent += 1;
        if paused {
            self.silent_chunks += 1;
        }
        trace!(chunk = self.chunks_sent, paused, "Chunk sent");
        Ok(())
    }
}

impl<R: Read, W: Write> CycleBody for AudioStreamer<'_, R, W> {
    fn run_cycle(&mut self) -> RtResult<()> {
        self.stream_chunk()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Accepts at most `limit` bytes per write.
    struct ShortWriter {
        limit: usize,
    }

    impl Write for ShortWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(buf.len().min(self.limit))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct FailingWriter;

    impl Write for FailingWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(ErrorKind::BrokenPipe, "line dropped"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn source(chunks: u8, chunk_size: usize) -> Cursor<Vec<u8>> {
        let data = (1..=chunks)
            .flat_map(|n| std::iter::repeat(n).take(chunk_size))
            .collect();
        Cursor::new(data)
    }

    #[test]
    fn test_streams_source_in_chunks() {
        let pause = PauseState::without_priority_control();
        let mut streamer = AudioStreamer::new(source(2, 4), Vec::new(), &pause, 4);

        streamer.stream_chunk().unwrap();
        streamer.stream_chunk().unwrap();

        assert_eq!(streamer.chunks_sent(), 2);
        let (_, out) = streamer.into_parts();
        assert_eq!(out, vec![1, 1, 1, 1, 2, 2, 2, 2]);
    }

    #[test]
    fn test_paused_sends_silence_without_reading() {
        let pause = PauseState::without_priority_control();
        let mut streamer = AudioStreamer::new(source(2, 4), Vec::new(), &pause, 4);

        streamer.stream_chunk().unwrap();
        pause.set_paused(true);
        streamer.stream_chunk().unwrap();
        streamer.stream_chunk().unwrap();
        pause.set_paused(false);
        streamer.stream_chunk().unwrap();

        assert_eq!(streamer.silent_chunks(), 2);
        let (src, out) = streamer.into_parts();
        assert_eq!(src.position(), 8);
        assert_eq!(out, vec![1, 1, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 2, 2, 2, 2]);
    }

    #[test]
    fn test_source_exhaustion_is_io_failure() {
        let pause = PauseState::without_priority_control();
        let mut streamer = AudioStreamer::new(Cursor::new(vec![7u8; 6]), Vec::new(), &pause, 4);

        streamer.stream_chunk().unwrap();
        let err = streamer.stream_chunk().unwrap_err();

        assert_eq!(
            err,
            RtError::IoFailure {
                endpoint: Endpoint::Source,
                reason: "source exhausted".to_string(),
            }
        );
        assert_eq!(streamer.chunks_sent(), 1);
    }

    #[test]
    fn test_short_write_is_io_failure() {
        let pause = PauseState::without_priority_control();
        let mut streamer = AudioStreamer::new(source(1, 8), ShortWriter { limit: 5 }, &pause, 8);

        let err = streamer.stream_chunk().unwrap_err();
        assert!(matches!(
            err,
            RtError::IoFailure {
                endpoint: Endpoint::Transport,
                ..
            }
        ));
        assert_eq!(streamer.chunks_sent(), 0);
    }

    #[test]
    fn test_write_error_is_io_failure() {
        let pause = PauseState::without_priority_control();
        pause.set_paused(true);
        let mut streamer = AudioStreamer::new(std::io::empty(), FailingWriter, &pause, 16);

        let err = streamer.run_cycle().unwrap_err();
        assert!(matches!(
            err,
            RtError::IoFailure {
                endpoint: Endpoint::Transport,
                ..
            }
        ));
        assert_eq!(streamer.silent_chunks(), 0);
        assert_eq!(streamer.chunks_sent(), 0);
    }

    #[test]
    fn test_short_silent_write_is_not_counted() {
        let pause = PauseState::without_priority_control();
        pause.set_paused(true);
        let mut streamer =
            AudioStreamer::new(std::io::empty(), ShortWriter { limit: 3 }, &pause, 4);

        assert!(streamer.stream_chunk().is_err());
        assert_eq!(streamer.silent_chunks(), 0);
    }
}
