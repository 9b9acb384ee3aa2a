//! Fixed-size binary frame codec for the MCU polling protocol.
//!
//! Every message in either direction is a 513-byte frame. Outbound command
//! frames carry a short header followed by a 16-bit checksum (modulo-65536
//! sum of the header bytes, split into a big-endian byte pair); the rest of
//! the frame is zero-filled. Inbound data responses are identified by the
//! type discriminant at byte 5.

use thiserror::Error;

/// Total length of every frame on the wire.
pub const FRAME_LEN: usize = 513;

/// Offset of the type/command discriminant.
pub const TYPE_OFFSET: usize = 5;
/// Discriminant marking a valid data response.
pub const DATA_RESPONSE_TYPE: u8 = 3;
/// Minimum length of a usable inbound reply.
pub const MIN_REPLY_LEN: usize = 13;

/// Big-endian ADC position counter, range 0..=99.
pub const POSITION_OFFSET: usize = 6;
pub const HEART_RATE_OFFSET: usize = 12;
pub const RESP_RATE_OFFSET: usize = 13;
pub const OUT_OF_BED_OFFSET: usize = 14;
pub const MOVEMENT_OFFSET: usize = 15;
pub const AUTOSCALING_OFFSET: usize = 24;
pub const RSSI_OFFSET: usize = 27;

/// Raw waveform ring buffer: 100 two-byte big-endian slots.
pub const RAW_RING_OFFSET: usize = 32;
/// Heart waveform ring buffer, same indexing as raw.
pub const HEART_RING_OFFSET: usize = 232;
pub const RING_SLOTS: usize = 100;

/// ASCII device identifier, null-padded.
pub const DEVICE_ID_OFFSET: usize = 432;
pub const DEVICE_ID_LEN: usize = 16;

/// Raw out-of-bed code signalling the subject has left the bed.
pub const OUT_OF_BED_SENTINEL: u8 = 79;

/// Offset and length of the ASCII timestamp tag stamped into poll frames.
pub const POLL_TAG_OFFSET: usize = 7;
pub const POLL_TAG_LEN: usize = 12;

const CHECK_HEADER: [u8; 7] = [0x13, 0x00, 0x01, 0x00, 0x09, 0x00, 0x01];
const POLL_HEADER: [u8; 7] = [0x13, 0x00, 0x28, 0x00, 0x09, 0x00, 0x01];
const AUTOSCALING_HEADER: [u8; 11] = [
    0x13, 0x00, 0x89, 0x00, 0x0D, 0x14, 0xEB, 0x01, 0x01, 0x00, 0x01,
];

/// Errors raised while decoding inbound frames
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("frame too short: {len} bytes")]
    ShortFrame { len: usize },

    #[error("ADC position counter {0} outside the 100-slot ring window")]
    PositionOutOfRange(u16),

    #[error("device identifier is not valid ASCII")]
    InvalidDeviceId,
}

/// Modulo-65536 sum of `header`, split into a (high, low) byte pair.
pub fn checksum(header: &[u8]) -> (u8, u8) {
    let sum: u32 = header.iter().map(|&b| u32::from(b)).sum();
    let sum = (sum & 0xFFFF) as u16;
    ((sum >> 8) as u8, (sum & 0xFF) as u8)
}

/// Handshake verification frame sent right after accept.
pub fn build_check_frame() -> [u8; FRAME_LEN] {
    let mut frame = [0u8; FRAME_LEN];
    frame[..CHECK_HEADER.len()].copy_from_slice(&CHECK_HEADER);
    let (high, low) = checksum(&frame[..CHECK_HEADER.len()]);
    frame[7] = high;
    frame[8] = low;
    frame
}

/// Poll frame requesting the next data response.
///
/// The ASCII `tag` (truncated to [`POLL_TAG_LEN`]) is stamped into the
/// header so every outbound poll is time-tagged; the checksum covers the
/// full 19-byte tagged header and lands at bytes 19 and 20.
pub fn build_poll_frame(tag: &str) -> [u8; FRAME_LEN] {
    let mut frame = [0u8; FRAME_LEN];
    frame[..POLL_HEADER.len()].copy_from_slice(&POLL_HEADER);
    let bytes = tag.as_bytes();
    let n = bytes.len().min(POLL_TAG_LEN);
    frame[POLL_TAG_OFFSET..POLL_TAG_OFFSET + n].copy_from_slice(&bytes[..n]);
    let header_end = POLL_TAG_OFFSET + POLL_TAG_LEN;
    let (high, low) = checksum(&frame[..header_end]);
    frame[header_end] = high;
    frame[header_end + 1] = low;
    frame
}

/// Out-of-band command telling the MCU to re-run waveform autoscaling.
pub fn build_autoscaling_frame() -> [u8; FRAME_LEN] {
    let mut frame = [0u8; FRAME_LEN];
    frame[..AUTOSCALING_HEADER.len()].copy_from_slice(&AUTOSCALING_HEADER);
    let (high, low) = checksum(&frame[..AUTOSCALING_HEADER.len()]);
    frame[11] = high;
    frame[12] = low;
    frame
}

/// Shape check applied to the handshake reply: long enough to carry the
/// discriminant span, and marked as a data response.
pub fn is_valid_reply(data: &[u8]) -> bool {
    data.len() >= MIN_REPLY_LEN && data[TYPE_OFFSET] == DATA_RESPONSE_TYPE
}

/// Extract the null-padded ASCII device identifier from a data frame.
pub fn device_id(frame: &[u8]) -> Result<String, CodecError> {
    let end = DEVICE_ID_OFFSET + DEVICE_ID_LEN;
    if frame.len() < end {
        return Err(CodecError::ShortFrame { len: frame.len() });
    }
    let raw = &frame[DEVICE_ID_OFFSET..end];
    let trimmed: &[u8] = match raw.iter().rposition(|&b| b != 0) {
        Some(last) => &raw[..=last],
        None => &[],
    };
    let id = std::str::from_utf8(trimmed).map_err(|_| CodecError::InvalidDeviceId)?;
    if !id.is_ascii() {
        return Err(CodecError::InvalidDeviceId);
    }
    Ok(id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_recombines_to_sum_mod_65536() {
        let header = [0xFFu8; 300];
        let expected = (300u32 * 0xFF) % 65_536;
        let (high, low) = checksum(&header);
        assert_eq!(u32::from(high) << 8 | u32::from(low), expected);

        let (high, low) = checksum(&[0x13, 0x00, 0x28, 0x00, 0x09, 0x00, 0x01]);
        assert_eq!((high, low), (0x00, 0x45));
    }

    #[test]
    fn check_frame_layout() {
        let frame = build_check_frame();
        assert_eq!(frame.len(), FRAME_LEN);
        // header sum is 0x1E, so the checksum pair is 00 1E
        assert_eq!(
            &frame[..9],
            &[0x13, 0x00, 0x01, 0x00, 0x09, 0x00, 0x01, 0x00, 0x1E]
        );
        assert!(frame[9..].iter().all(|&b| b == 0));
    }

    #[test]
    fn poll_frame_is_time_tagged() {
        let frame = build_poll_frame("250101120000");
        assert_eq!(&frame[..7], &[0x13, 0x00, 0x28, 0x00, 0x09, 0x00, 0x01]);
        assert_eq!(&frame[7..19], b"250101120000");
        let (high, low) = checksum(&frame[..19]);
        assert_eq!((frame[19], frame[20]), (high, low));
        assert!(frame[21..].iter().all(|&b| b == 0));
    }

    #[test]
    fn poll_frame_truncates_long_tags() {
        let frame = build_poll_frame("2501011200001234");
        assert_eq!(&frame[7..19], b"250101120000");
    }

    #[test]
    fn autoscaling_frame_layout() {
        let frame = build_autoscaling_frame();
        assert_eq!(
            &frame[..11],
            &[0x13, 0x00, 0x89, 0x00, 0x0D, 0x14, 0xEB, 0x01, 0x01, 0x00, 0x01]
        );
        let (high, low) = checksum(&frame[..11]);
        assert_eq!((frame[11], frame[12]), (high, low));
    }

    #[test]
    fn reply_validation() {
        let mut reply = [0u8; 13];
        reply[TYPE_OFFSET] = DATA_RESPONSE_TYPE;
        assert!(is_valid_reply(&reply));

        // too short
        assert!(!is_valid_reply(&reply[..12]));

        // wrong discriminant
        reply[TYPE_OFFSET] = 1;
        assert!(!is_valid_reply(&reply));
    }

    #[test]
    fn device_id_trims_trailing_nulls() {
        let mut frame = [0u8; FRAME_LEN];
        frame[DEVICE_ID_OFFSET..DEVICE_ID_OFFSET + 6].copy_from_slice(b"DEV001");
        assert_eq!(device_id(&frame).unwrap(), "DEV001");
    }

    #[test]
    fn device_id_rejects_short_frames() {
        let frame = [0u8; 100];
        assert!(matches!(
            device_id(&frame),
            Err(CodecError::ShortFrame { len: 100 })
        ));
    }

    #[test]
    fn device_id_rejects_non_ascii() {
        let mut frame = [0u8; FRAME_LEN];
        frame[DEVICE_ID_OFFSET] = 0xC3;
        frame[DEVICE_ID_OFFSET + 1] = 0x28;
        assert!(matches!(device_id(&frame), Err(CodecError::InvalidDeviceId)));
    }
}
