//! Length-prefixed envelope framing over byte streams.
//!
//! The transport itself lives outside this workspace; these helpers
//! define the frame shape any transport uses: a little-endian `u32`
//! length followed by the [`Envelope::to_bytes`] payload.

use std::io::{Read, Write};

use crate::{Envelope, MsgError};

/// Sanity cap on a single frame.
const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Writes one envelope as a length-prefixed frame.
///
/// # Errors
///
/// Encoding errors from [`Envelope::to_bytes`], or `MSG_CODEC` on I/O
/// failure.
pub fn write_frame<W: Write>(mut w: W, envelope: &Envelope) -> Result<(), MsgError> {
    let payload = envelope.to_bytes()?;
    let len = u32::try_from(payload.len())
        .map_err(|_| MsgError::Codec("frame too large".into()))?;

    w.write_all(&len.to_le_bytes())
        .and_then(|()| w.write_all(&payload))
        .and_then(|()| w.flush())
        .map_err(|e| MsgError::Codec(e.to_string()))
}

/// Reads one length-prefixed envelope frame.
///
/// # Errors
///
/// `MSG_CODEC` on I/O failure, an oversized frame, or a malformed
/// payload.
pub fn read_frame<R: Read>(mut r: R) -> Result<Envelope, MsgError> {
    let mut len_bytes = [0u8; 4];
    r.read_exact(&mut len_bytes)
        .map_err(|e| MsgError::Codec(e.to_string()))?;

    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_LEN {
        return Err(MsgError::Codec(format!("frame too large: {len} bytes")));
    }

    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)
        .map_err(|e| MsgError::Codec(e.to_string()))?;

    Envelope::from_bytes(&payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Cmd, Data, Message};

    #[test]
    fn frame_roundtrip() {
        let mut cmd = Cmd::new("hello_world");
        cmd.set_property("detail", "hi").expect("set");

        let mut buf = Vec::new();
        write_frame(&mut buf, &Envelope::from(cmd.clone())).expect("write");

        let back = read_frame(buf.as_slice()).expect("read");
        assert_eq!(back, Envelope::Cmd(cmd));
    }

    #[test]
    fn multiple_frames_in_sequence() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &Envelope::from(Cmd::new("one"))).expect("write");
        write_frame(
            &mut buf,
            &Envelope::from(Data::new("two").with_payload(vec![1, 2, 3])),
        )
        .expect("write");

        let mut cursor = buf.as_slice();
        assert_eq!(read_frame(&mut cursor).expect("read").name(), "one");
        assert_eq!(read_frame(&mut cursor).expect("read").name(), "two");
    }

    #[test]
    fn truncated_frame_fails() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &Envelope::from(Cmd::new("x"))).expect("write");
        buf.truncate(buf.len() - 1);

        assert!(read_frame(buf.as_slice()).is_err());
    }

    #[test]
    fn oversized_length_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&u32::MAX.to_le_bytes());
        assert!(read_frame(buf.as_slice()).is_err());
    }
}
