//! Sources of decoded ticket strings.
//!
//! Camera capture and QR decoding happen outside this crate; anything that
//! can hand over decoded strings implements [`FrameSource`].

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::warn;

#[async_trait]
pub trait FrameSource: Send {
    /// Next decoded frame. An empty string means no code was visible;
    /// `None` means the source is exhausted and must be re-created.
    async fn next_frame(&mut self) -> Option<String>;
}

/// One frame per line of an async reader, e.g. `zbarcam --raw | eventhive-scanner`.
pub struct LineFrameSource<R> {
    lines: Lines<R>,
}

impl<R: AsyncBufRead + Unpin + Send> LineFrameSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
        }
    }
}

impl LineFrameSource<BufReader<Stdin>> {
    /// Read frames from standard input
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> FrameSource for LineFrameSource<R> {
    async fn next_frame(&mut self) -> Option<String> {
        match self.lines.next_line().await {
            Ok(line) => line,
            Err(e) => {
                warn!("Frame source failed: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lines_become_frames() {
        let mut source = LineFrameSource::new("EH-AB12CD34\n\n{\"qr_code\":\"x\"}\n".as_bytes());
        assert_eq!(source.next_frame().await.as_deref(), Some("EH-AB12CD34"));
        assert_eq!(source.next_frame().await.as_deref(), Some(""));
        assert_eq!(source.next_frame().await.as_deref(), Some("{\"qr_code\":\"x\"}"));
        assert_eq!(source.next_frame().await, None);
    }
}
