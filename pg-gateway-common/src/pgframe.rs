/// Builds the synthetic `ErrorResponse` frame (spec §6) emitted to a client
/// that connects while no primary is known. Byte-exact layout:
///
/// ```text
/// 'E'                   1 byte,  frame type
/// <int32 be>             4 bytes, length of everything that follows,
///                                 INCLUDING these four length bytes
/// 'S' "FATAL" 0x00
/// 'C' "08006" 0x00
/// 'M' <message> 0x00
/// 0x00                   terminator
/// ```
pub fn no_primary_error_frame(message: &str) -> Vec<u8> {
    let mut body = Vec::new();
    body.push(b'S');
    body.extend_from_slice(b"FATAL");
    body.push(0);
    body.push(b'C');
    body.extend_from_slice(b"08006");
    body.push(0);
    body.push(b'M');
    body.extend_from_slice(message.as_bytes());
    body.push(0);
    body.push(0); // terminator

    let length = (body.len() + 4) as i32;

    let mut frame = Vec::with_capacity(1 + body.len() + 4);
    frame.push(b'E');
    frame.extend_from_slice(&length.to_be_bytes());
    frame.extend_from_slice(&body);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_starts_with_type_byte_and_sqlstate() {
        let frame = no_primary_error_frame("hi");
        assert_eq!(frame[0], b'E');
        assert!(frame.windows(5).any(|w| w == b"08006"));
        assert!(frame.windows(5).any(|w| w == b"FATAL"));
        // "...hi" followed by the message-field null and the frame terminator.
        assert_eq!(&frame[frame.len() - 4..], b"hi\x00\x00" as &[u8]);
    }

    #[test]
    fn length_field_matches_total_trailing_bytes() {
        let frame = no_primary_error_frame("hi");
        let declared_len = i32::from_be_bytes(frame[1..5].try_into().unwrap());
        // Declared length counts everything after the type byte, including
        // the four length bytes themselves.
        assert_eq!(declared_len as usize, frame.len() - 1);
    }

    #[test]
    fn length_recomputes_for_longer_messages() {
        let short = no_primary_error_frame("hi");
        let long = no_primary_error_frame("connection refused by all candidates");
        assert!(long.len() > short.len());
        let declared = i32::from_be_bytes(long[1..5].try_into().unwrap()) as usize;
        assert_eq!(declared, long.len() - 1);
    }
}
