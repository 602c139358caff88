/// Observer terminals answer emulator queries (device attributes, cursor
/// position, status) on the same stream as the user's keystrokes. Those
/// answers must not reach the agent's PTY as typed input, so they are excised
/// here; everything else passes through byte for byte.
///
/// Stripped sequences:
///   - primary device attributes response: `ESC [ ? ... c`
///   - cursor position report:             `ESC [ row ; col R`
///   - device status report:               `ESC [ 0 n`
pub fn strip_terminal_responses(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;

    while i < input.len() {
        if input[i] == 0x1b && input.get(i + 1) == Some(&b'[') {
            if let Some(end) = csi_end(input, i + 2) {
                if is_terminal_response(&input[i + 2..end], input[end]) {
                    i = end + 1;
                    continue;
                }
                // Some other CSI sequence (arrow keys etc.), keep it whole.
                out.extend_from_slice(&input[i..=end]);
                i = end + 1;
                continue;
            }
            // Incomplete sequence at the end of the frame; pass through.
        }
        out.push(input[i]);
        i += 1;
    }

    out
}

/// Index of the final byte of a CSI sequence whose parameters start at
/// `start`, or None if the sequence is not terminated within the frame.
fn csi_end(input: &[u8], start: usize) -> Option<usize> {
    let mut i = start;
    while i < input.len() {
        match input[i] {
            b'0'..=b'9' | b';' | b'?' => i += 1,
            0x40..=0x7e => return Some(i),
            _ => return None,
        }
    }
    None
}

fn is_terminal_response(params: &[u8], final_byte: u8) -> bool {
    match final_byte {
        // DA response carries the `?` private marker.
        b'c' => params.first() == Some(&b'?'),
        // CPR: digits and one semicolon only.
        b'R' => {
            !params.is_empty()
                && params.iter().all(|b| b.is_ascii_digit() || *b == b';')
        }
        // DSR status reply.
        b'n' => params.iter().all(|b| b.is_ascii_digit()),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_attributes_response_is_excised_exactly() {
        let input = b"abc\x1b[?1;2cdef";
        assert_eq!(strip_terminal_responses(input), b"abcdef");
    }

    #[test]
    fn cursor_position_report_is_excised() {
        let input = b"hi\x1b[24;80Rthere";
        assert_eq!(strip_terminal_responses(input), b"hithere");
    }

    #[test]
    fn device_status_report_is_excised() {
        let input = b"\x1b[0nok";
        assert_eq!(strip_terminal_responses(input), b"ok");
    }

    #[test]
    fn arrow_keys_pass_through() {
        let input = b"\x1b[A\x1b[B\x1b[C\x1b[D";
        assert_eq!(strip_terminal_responses(input), input);
    }

    #[test]
    fn plain_text_is_untouched() {
        let input = b"cargo test --workspace\r";
        assert_eq!(strip_terminal_responses(input), input);
    }

    #[test]
    fn incomplete_sequence_at_frame_end_passes_through() {
        let input = b"x\x1b[24;8";
        assert_eq!(strip_terminal_responses(input), input);
    }

    #[test]
    fn mixed_frame_keeps_surrounding_bytes() {
        let input = b"a\x1b[?62c\x1b[Ab\x1b[12;3Rc";
        assert_eq!(strip_terminal_responses(input), b"a\x1b[Abc");
    }
}
