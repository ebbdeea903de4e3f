//! NDJSON record codec and chunk reassembly
//!
//! The server writes one compact JSON envelope per line. The network is free
//! to split, merge or fragment those writes arbitrarily, so the reader keeps
//! a carry-over buffer of raw bytes and only decodes complete lines. The
//! carry is bytes rather than text so a UTF-8 sequence split across two
//! chunks cannot be corrupted.

use tracing::warn;

use crate::error::Result;
use crate::message::UpdateEnvelope;

/// Encode one envelope as a single NDJSON record (compact JSON + newline)
pub fn encode_record(envelope: &UpdateEnvelope) -> Result<String> {
    let mut line = serde_json::to_string(envelope)?;
    line.push('\n');
    Ok(line)
}

/// Reassembles newline-delimited records from arbitrarily fragmented chunks
///
/// No record is ever dropped, duplicated or corrupted by a split: complete
/// lines are drained in arrival order, the trailing incomplete record is
/// carried over to the next chunk, and a line that fails to decode is logged
/// and skipped without aborting the stream.
#[derive(Debug, Default)]
pub struct StreamReader {
    carry: Vec<u8>,
}

impl StreamReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one raw chunk, returning every record completed by it
    pub fn push(&mut self, chunk: &[u8]) -> Vec<UpdateEnvelope> {
        self.carry.extend_from_slice(chunk);

        let mut decoded = Vec::new();
        while let Some(pos) = self.carry.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.carry.drain(..=pos).collect();
            if let Some(envelope) = decode_line(&line[..pos]) {
                decoded.push(envelope);
            }
        }
        decoded
    }

    /// Flush the reader at end of stream
    ///
    /// The server terminates every record with a newline, so leftover carry
    /// normally means a truncated record. A final decode is still attempted
    /// in case the last record arrived without its terminator.
    pub fn finish(&mut self) -> Option<UpdateEnvelope> {
        let rest = std::mem::take(&mut self.carry);
        if rest.iter().all(|b| b.is_ascii_whitespace()) {
            return None;
        }
        let envelope = decode_line(&rest);
        if envelope.is_none() {
            warn!("discarding truncated record at end of stream ({} bytes)", rest.len());
        }
        envelope
    }

    /// Bytes currently held back waiting for a record terminator
    pub fn pending(&self) -> usize {
        self.carry.len()
    }
}

fn decode_line(line: &[u8]) -> Option<UpdateEnvelope> {
    let text = match std::str::from_utf8(line) {
        Ok(t) => t,
        Err(e) => {
            warn!("skipping non-UTF-8 record: {}", e);
            return None;
        }
    };
    if text.trim().is_empty() {
        return None;
    }
    match serde_json::from_str(text) {
        Ok(envelope) => Some(envelope),
        Err(e) => {
            warn!("skipping malformed record: {}", e);
            None
        }
    }
}
