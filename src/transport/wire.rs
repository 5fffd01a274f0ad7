//! Length-prefixed framing for byte-stream transports
//!
//! Each frame is a `u32` little-endian byte count followed by exactly that
//! many bytes of UTF-8 payload.

use std::io::{self, Read};

/// Size of the length prefix
pub const PREFIX_LEN: usize = 4;

/// Prefix and payload in one buffer, so a single `write` carries both
pub fn encode_frame(payload: &str) -> Vec<u8> {
    let bytes = payload.as_bytes();
    let mut out = Vec::with_capacity(PREFIX_LEN + bytes.len());
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
    out
}

/// Read one frame. `Ok(None)` on a clean end of stream before a prefix.
pub fn read_frame<R: Read>(reader: &mut R) -> io::Result<Option<String>> {
    let mut prefix = [0u8; PREFIX_LEN];
    let mut filled = 0;
    while filled < PREFIX_LEN {
        match reader.read(&mut prefix[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    let len = u32::from_le_bytes(prefix) as usize;
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    String::from_utf8(payload)
        .map(Some)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    #[test]
    fn test_prefix_is_little_endian_byte_count() {
        let frame = encode_frame("héllo");
        assert_eq!(&frame[..4], &[6, 0, 0, 0]);
        assert_eq!(&frame[4..], "héllo".as_bytes());
    }

    #[test]
    fn test_empty_payload() {
        let frame = encode_frame("");
        assert_eq!(frame, vec![0, 0, 0, 0]);
        let mut cursor = Cursor::new(frame);
        assert_eq!(read_frame(&mut cursor).unwrap(), Some(String::new()));
        assert_eq!(read_frame(&mut cursor).unwrap(), None);
    }

    #[test]
    fn test_truncated_frame() {
        let mut frame = encode_frame("abcdef");
        frame.truncate(7);
        assert!(read_frame(&mut Cursor::new(frame)).is_err());
        assert!(read_frame(&mut Cursor::new(vec![1, 0])).is_err());
    }

    #[test]
    fn test_invalid_utf8() {
        let bytes = vec![2, 0, 0, 0, 0xff, 0xfe];
        let err = read_frame(&mut Cursor::new(bytes)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    proptest! {
        #[test]
        fn prop_frames_decode_in_sequence(payloads in proptest::collection::vec(".{0,200}", 1..5)) {
            let mut stream = Vec::new();
            for p in &payloads {
                let frame = encode_frame(p);
                let len = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
                prop_assert_eq!(len, p.len());
                stream.extend_from_slice(&frame);
            }
            let mut cursor = Cursor::new(stream);
            for p in &payloads {
                let got = read_frame(&mut cursor).unwrap();
                prop_assert_eq!(got.as_deref(), Some(p.as_str()));
            }
            let tail = read_frame(&mut cursor).unwrap();
            prop_assert_eq!(tail, None);
        }
    }
}
