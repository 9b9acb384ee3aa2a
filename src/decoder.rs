//! Decoding of MCU data response frames.
//!
//! The interesting part is the sample stream: each response carries two
//! 100-slot ring buffers (raw and heart waveform) plus a position counter
//! telling how far the device has written since the last poll. The decoder
//! reconstructs the contiguous run of newly-arrived samples across the wrap
//! boundary without ever duplicating or skipping a slot.

use crate::frame::{
    CodecError, AUTOSCALING_OFFSET, DEVICE_ID_LEN, DEVICE_ID_OFFSET, HEART_RATE_OFFSET,
    HEART_RING_OFFSET, MOVEMENT_OFFSET, OUT_OF_BED_OFFSET, OUT_OF_BED_SENTINEL, POSITION_OFFSET,
    RAW_RING_OFFSET, RESP_RATE_OFFSET, RING_SLOTS, RSSI_OFFSET,
};

/// One fully-decoded poll cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReading {
    /// ADC position counter reported by this frame (0..=99).
    pub position: u16,
    pub heart_rate: u8,
    pub resp_rate: u8,
    pub movement: u8,
    pub outofbed: u8,
    pub autoscaling: u8,
    /// Signal strength as reported, in dBm.
    pub rssi_dbm: i8,
    /// Newly-arrived (raw, heart) waveform sample pairs, in arrival order.
    pub samples: Vec<(u16, u16)>,
}

fn ring_slot(frame: &[u8], base: usize, index: usize) -> u16 {
    let at = base + index * 2;
    u16::from(frame[at]) << 8 | u16::from(frame[at + 1])
}

/// Emit the ring slots written since `prev`, given the frame's counter `cur`.
///
/// `cur > prev` means the device wrote contiguously from `prev` to `cur - 1`.
/// Otherwise the counter wrapped past the end of the ring (the `cur == prev`
/// steady state is a full wrap), so the run is `prev..100` followed by
/// `0..cur`. Yields between 0 and 100 pairs and never reads outside the
/// 100-slot window.
pub fn decode_samples(frame: &[u8], prev: u16, cur: u16) -> Vec<(u16, u16)> {
    let pair = |i: usize| {
        (
            ring_slot(frame, RAW_RING_OFFSET, i),
            ring_slot(frame, HEART_RING_OFFSET, i),
        )
    };

    let mut samples = Vec::with_capacity(RING_SLOTS);
    if cur > prev {
        for i in prev as usize..cur as usize {
            samples.push(pair(i));
        }
    } else {
        for i in prev as usize..RING_SLOTS {
            samples.push(pair(i));
        }
        for i in 0..cur as usize {
            samples.push(pair(i));
        }
    }
    samples
}

/// Decode a full data response frame against the session's last-seen
/// position counter.
pub fn decode_cycle(frame: &[u8], last_position: u16) -> Result<CycleReading, CodecError> {
    if frame.len() < DEVICE_ID_OFFSET + DEVICE_ID_LEN {
        return Err(CodecError::ShortFrame { len: frame.len() });
    }

    let position =
        u16::from(frame[POSITION_OFFSET]) << 8 | u16::from(frame[POSITION_OFFSET + 1]);
    if position as usize >= RING_SLOTS {
        return Err(CodecError::PositionOutOfRange(position));
    }

    let oob_code = frame[OUT_OF_BED_OFFSET];
    let (outofbed, movement) = if oob_code == OUT_OF_BED_SENTINEL {
        // out of bed: movement is meaningless, force it to zero
        (1, 0)
    } else {
        (0, frame[MOVEMENT_OFFSET])
    };

    Ok(CycleReading {
        position,
        heart_rate: frame[HEART_RATE_OFFSET],
        resp_rate: frame[RESP_RATE_OFFSET],
        movement,
        outofbed,
        autoscaling: frame[AUTOSCALING_OFFSET],
        rssi_dbm: frame[RSSI_OFFSET] as i8,
        samples: decode_samples(frame, last_position, position),
    })
}

/// Map a reported dBm value onto the display bucket used by the frontend.
/// Values outside the calibrated range come back as -1 (unknown).
pub fn rssi_bucket(dbm: i8) -> i8 {
    match dbm {
        -50..=-30 => 0,
        -65..=-51 => 1,
        -75..=-66 => 2,
        -84..=-76 => 3,
        i8::MIN..=-85 => 4,
        _ => -1,
    }
}
