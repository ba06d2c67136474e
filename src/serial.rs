use std::{path::Path, time::Duration};

use anyhow::Context;
use rppal::uart::{Parity, Uart};
use tokio::sync::mpsc;

pub const PARITY: Parity = Parity::None;
pub const DATA_BITS: u8 = 8;
pub const STOP_BITS: u8 = 1;

pub const LINE_DELIMITER: &[u8] = b"\r\n";
pub const READ_TIMEOUT: Duration = Duration::from_millis(100);
/// Pending bytes without a delimiter beyond this are discarded.
pub const MAX_LINE_BYTES: usize = 4096;

/// Splits a raw byte stream into `\r\n` delimited lines.
#[derive(Debug, Default)]
pub struct LineFramer {
    buf: Vec<u8>,
    scanned: usize,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds `bytes` and returns every line completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);

        let mut lines = Vec::new();
        loop {
            let start = self.scanned;
            let Some(pos) = self.buf[start..]
                .windows(LINE_DELIMITER.len())
                .position(|w| w == LINE_DELIMITER)
                .map(|p| p + start)
            else {
                break;
            };

            let raw: Vec<u8> = self.buf.drain(..pos + LINE_DELIMITER.len()).collect();
            self.scanned = 0;
            let line = String::from_utf8_lossy(&raw[..pos]);
            let line = line.trim_matches(|c| c == '\r' || c == '\n');
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }

        if self.buf.len() > MAX_LINE_BYTES {
            log::warn!(
                "Discarding {} bytes received without a line delimiter",
                self.buf.len()
            );
            self.buf.clear();
        }
        // A delimiter may straddle the next push.
        self.scanned = self.buf.len().saturating_sub(LINE_DELIMITER.len() - 1);
        lines
    }
}

#[derive(Debug)]
pub struct SerialLink {
    uart: Uart,
}

impl SerialLink {
    pub fn open(path: impl AsRef<Path>, baud_rate: u32) -> Result<SerialLink, anyhow::Error> {
        let mut uart = Uart::with_path(path, baud_rate, PARITY, DATA_BITS, STOP_BITS)
            .context("Failed to initialize UART")?;
        uart.set_read_mode(0, READ_TIMEOUT)
            .context("Failed to set read mode")?;

        Ok(SerialLink { uart })
    }

    /// Reads lines until the receiver is dropped or the UART fails. Blocks the
    /// calling thread.
    pub fn forward_lines(mut self, tx: mpsc::Sender<String>) -> Result<(), anyhow::Error> {
        let mut framer = LineFramer::new();
        let mut buf = [0u8; 64];

        while !tx.is_closed() {
            let n = self
                .uart
                .read(&mut buf)
                .context("Failed to read from UART")?;
            for line in framer.push(&buf[..n]) {
                if tx.blocking_send(line).is_err() {
                    return Ok(());
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_splits_on_crlf() {
        let mut framer = LineFramer::new();
        assert_eq!(framer.push(b"T__25\r\nH__55\r\n"), vec!["T__25", "H__55"]);
    }

    #[test]
    fn test_keeps_partial_line_until_delimiter() {
        let mut framer = LineFramer::new();
        assert!(framer.push(b"D__").is_empty());
        assert!(framer.push(b"10\r").is_empty());
        assert_eq!(framer.push(b"\nS_"), vec!["D__10"]);
        assert_eq!(framer.push(b"_1\r\n"), vec!["S__1"]);
    }

    #[test]
    fn test_skips_empty_lines_and_stray_newlines() {
        let mut framer = LineFramer::new();
        assert_eq!(framer.push(b"\r\n\nT__1\r\n\r\n"), vec!["T__1"]);
    }

    #[test]
    fn test_discards_overlong_line() {
        let mut framer = LineFramer::new();
        assert!(framer.push(&[b'x'; MAX_LINE_BYTES + 1]).is_empty());
        assert!(framer.buf.is_empty());
        assert_eq!(framer.push(b"T__1\r\n"), vec!["T__1"]);
    }

    #[test]
    fn test_delimiter_split_across_many_pushes() {
        let mut framer = LineFramer::new();
        for b in b"H__42\r" {
            assert!(framer.push(&[*b]).is_empty());
        }
        assert_eq!(framer.push(b"\n"), vec!["H__42"]);
        assert_eq!(framer.scanned, 0);
    }

    #[test]
    fn test_invalid_utf8_is_lossy() {
        let mut framer = LineFramer::new();
        let lines = framer.push(b"T__\xff2\r\n");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("T__"));
    }
}
