use std::collections::VecDeque;
use std::time::SystemTime;

/// One chunk of raw PTY output with its position in the session's stream.
#[derive(Debug, Clone)]
pub struct OutputChunk {
    pub seq: u64,
    pub data: Vec<u8>,
    pub timestamp: SystemTime,
}

/// Bounded in-memory buffer of recent output chunks.
///
/// Sequence numbers start at 1 and increase monotonically for the lifetime of
/// the session, so a reconnecting observer can ask for everything after the
/// last seq it saw.
#[derive(Debug)]
pub struct LiveBuffer {
    chunks: VecDeque<OutputChunk>,
    max_chunks: usize,
    next_seq: u64,
}

impl LiveBuffer {
    pub fn new(max_chunks: usize) -> Self {
        Self {
            chunks: VecDeque::with_capacity(max_chunks.max(1)),
            max_chunks: max_chunks.max(1),
            next_seq: 1,
        }
    }

    pub fn push(&mut self, data: Vec<u8>) -> OutputChunk {
        let chunk = OutputChunk {
            seq: self.next_seq,
            data,
            timestamp: SystemTime::now(),
        };
        self.next_seq = self.next_seq.saturating_add(1);
        self.chunks.push_back(chunk.clone());
        while self.chunks.len() > self.max_chunks {
            let _ = self.chunks.pop_front();
        }
        chunk
    }

    /// Chunks newer than `last_seq_seen`, oldest first.
    pub fn replay_from(&self, last_seq_seen: Option<u64>) -> Vec<OutputChunk> {
        let start_after = last_seq_seen.unwrap_or(0);
        self.chunks
            .iter()
            .filter(|chunk| chunk.seq > start_after)
            .cloned()
            .collect()
    }

    pub fn newest_seq(&self) -> Option<u64> {
        self.chunks.back().map(|c| c.seq)
    }
}
