use crewmux_protocol::RuntimeKind;

/// Chunk size for runtimes that paste normally.
pub const STANDARD_CHUNK_BYTES: usize = 1500;
/// Chunk size for runtimes whose bulk-paste detection mangles large writes.
pub const CAUTIOUS_CHUNK_BYTES: usize = 200;
/// Pause between consecutive chunk writes to one session.
pub const INTER_CHUNK_DELAY_MS: u64 = 120;

pub fn chunk_limit(runtime: RuntimeKind) -> usize {
    match runtime {
        RuntimeKind::Standard => STANDARD_CHUNK_BYTES,
        RuntimeKind::CautiousPaste => CAUTIOUS_CHUNK_BYTES,
    }
}

/// Split `text` into chunks of at most `limit` bytes without splitting a
/// UTF-8 character. The concatenation of all chunks is byte-identical to the
/// input.
pub fn chunk_text(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(4);
    let mut chunks = Vec::new();
    let mut rest = text;
    while rest.len() > limit {
        let mut cut = limit;
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        let (head, tail) = rest.split_at(cut);
        chunks.push(head.to_string());
        rest = tail;
    }
    if !rest.is_empty() || chunks.is_empty() {
        chunks.push(rest.to_string());
    }
    chunks
}

/// Byte sequence for a named key, or None for an unknown name.
pub fn key_bytes(key: &str) -> Option<&'static [u8]> {
    let bytes: &'static [u8] = match key {
        "enter" => b"\r",
        "tab" => b"\t",
        "backspace" => b"\x7f",
        "escape" => b"\x1b",
        "up" => b"\x1b[A",
        "down" => b"\x1b[B",
        "right" => b"\x1b[C",
        "left" => b"\x1b[D",
        "ctrl-c" => b"\x03",
        "ctrl-d" => b"\x04",
        "ctrl-u" => b"\x15",
        _ => return None,
    };
    Some(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_reassemble_byte_identical() {
        let text = "x".repeat(STANDARD_CHUNK_BYTES * 2 + 37);
        let chunks = chunk_text(&text, STANDARD_CHUNK_BYTES);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.len() <= STANDARD_CHUNK_BYTES));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn chunking_respects_char_boundaries() {
        // é is two bytes; an odd limit would split it without the boundary walk.
        let text = "é".repeat(150);
        let chunks = chunk_text(&text, 101);
        assert!(chunks.iter().all(|c| c.len() <= 101));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(chunk_text("hello", CAUTIOUS_CHUNK_BYTES), vec!["hello"]);
        assert_eq!(chunk_text("", CAUTIOUS_CHUNK_BYTES), vec![""]);
    }

    #[test]
    fn known_and_unknown_keys() {
        assert_eq!(key_bytes("enter"), Some(b"\r".as_slice()));
        assert_eq!(key_bytes("ctrl-c"), Some(b"\x03".as_slice()));
        assert_eq!(key_bytes("hyperspace"), None);
    }
}
