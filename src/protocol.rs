//! Probe wire protocol
//!
//! Probes answer a one-character command terminated by `0x0D` with a short
//! binary frame:
//!
//! ```text
//! one probe:   41 41 5A <ind> 5A <hi> <lo> 5A 0D
//! two probes:  41 41 5A  03   5A <hi> <lo> 5A <hi> <lo> 5A 0D
//! ```
//!
//! Raw values are big-endian `u16`; the temperature is `(raw - 4000) / 100`.
//! `0xFFFF` marks a disconnected or broken sensor.
//!
//! ## Probe count
//!
//! A frame of exactly 12 bytes is read as a two-probe frame whatever the
//! indicator byte says. Otherwise the indicator decides (`0x03` = two probes).
//! Devices in the field disagree with themselves often enough that the length
//! check has to win.

use std::fmt;

use tracing::{debug, trace, warn};

use crate::util::round_half_up_2;

pub const FRAME_HEADER: [u8; 3] = [0x41, 0x41, 0x5A];
pub const SEPARATOR: u8 = 0x5A;
pub const TERMINATOR: u8 = 0x0D;
pub const TWO_PROBE_INDICATOR: u8 = 0x03;

pub const MIN_FRAME_LEN: usize = 9;
pub const TWO_PROBE_FRAME_LEN: usize = 12;

/// Raw value reported by a disconnected or faulty sensor.
pub const SENSOR_FAULT_RAW: i32 = 0xFFFF;

const RAW_ZERO: i32 = 4000;

/// Default request command.
pub const DEFAULT_COMMAND: &str = "A";

/// Slot layout: (probe number, mcu id, separator index, value index).
const PROBE_SLOTS: [(u8, &str, usize, usize); 2] = [(1, "A", 4, 5), (2, "B", 7, 8)];

/// One decoded probe value, scoped to a single poll.
#[derive(Debug, Clone, PartialEq)]
pub struct RawReading {
    pub probe_no: u8,
    pub mcu_id: String,
    pub raw_value: i32,
    /// Uncalibrated temperature, rounded half-up to two decimals.
    pub temperature: f64,
}

impl RawReading {
    pub fn new(probe_no: u8, mcu_id: impl Into<String>, raw_value: i32) -> Self {
        Self {
            probe_no,
            mcu_id: mcu_id.into(),
            raw_value,
            temperature: raw_to_temperature(raw_value),
        }
    }

    /// `0xFFFF` or `-1`: never persisted, never alerted on.
    pub fn is_sensor_fault(&self) -> bool {
        self.raw_value == SENSOR_FAULT_RAW || self.raw_value == -1
    }
}

pub fn raw_to_temperature(raw_value: i32) -> f64 {
    round_half_up_2(f64::from(raw_value - RAW_ZERO) / 100.0)
}

/// Frame-level decode failures. A bad separator only costs the affected
/// probe, so it is reported next to the readings instead of here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    TooShort(usize),
    InvalidHeader([u8; 3]),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::TooShort(len) => write!(
                f,
                "frame too short: {len} bytes (expected at least {MIN_FRAME_LEN})"
            ),
            FrameError::InvalidHeader(found) => write!(
                f,
                "invalid header: expected 41 41 5A, got {}",
                hex_dump(found)
            ),
        }
    }
}

impl std::error::Error for FrameError {}

/// Per-probe separator mismatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeparatorMismatch {
    pub probe_no: u8,
    pub index: usize,
    pub found: u8,
}

impl fmt::Display for SeparatorMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "probe {}: invalid separator at [{}], expected 0x5A, got 0x{:02X}",
            self.probe_no, self.index, self.found
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedFrame {
    pub readings: Vec<RawReading>,
    pub skipped: Vec<SeparatorMismatch>,
}

/// Whether the frame carries a second probe slot.
pub fn expects_two_probes(data: &[u8]) -> bool {
    data.len() == TWO_PROBE_FRAME_LEN || data.get(3) == Some(&TWO_PROBE_INDICATOR)
}

/// Decode a response frame.
///
/// Header and length problems reject the whole frame; a separator mismatch
/// drops only that probe.
pub fn decode_frame(data: &[u8]) -> Result<DecodedFrame, FrameError> {
    if data.len() < MIN_FRAME_LEN {
        return Err(FrameError::TooShort(data.len()));
    }

    if data[..3] != FRAME_HEADER {
        return Err(FrameError::InvalidHeader([data[0], data[1], data[2]]));
    }

    let slots = if expects_two_probes(data) { 2 } else { 1 };
    trace!(
        "indicator 0x{:02X}, {} bytes -> {slots} probe slot(s)",
        data[3],
        data.len()
    );

    let mut frame = DecodedFrame::default();
    for &(probe_no, mcu_id, separator_index, value_index) in &PROBE_SLOTS[..slots] {
        let Some(value) = data.get(value_index..value_index + 2) else {
            continue;
        };

        if data[separator_index] != SEPARATOR {
            frame.skipped.push(SeparatorMismatch {
                probe_no,
                index: separator_index,
                found: data[separator_index],
            });
            continue;
        }

        let raw_value = i32::from(u16::from_be_bytes([value[0], value[1]]));
        frame
            .readings
            .push(RawReading::new(probe_no, mcu_id, raw_value));
    }

    Ok(frame)
}

/// Decode a frame, logging every problem with the raw bytes.
///
/// Malformed frames yield no readings.
pub fn decode(data: &[u8]) -> Vec<RawReading> {
    match decode_frame(data) {
        Ok(frame) => {
            for mismatch in &frame.skipped {
                warn!("{mismatch} (frame: {})", hex_dump(data));
            }
            debug!(
                "decoded {} reading(s) from {}",
                frame.readings.len(),
                hex_dump(data)
            );
            frame.readings
        }
        Err(e) => {
            warn!("dropping frame: {e} (frame: {})", hex_dump(data));
            Vec::new()
        }
    }
}

/// Spaced upper-case hex, e.g. `41 41 5A 0D`.
pub fn hex_dump(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Request bytes for a command; an empty command means [`DEFAULT_COMMAND`].
pub fn encode_request(command: &str) -> Vec<u8> {
    let command = if command.is_empty() {
        DEFAULT_COMMAND
    } else {
        command
    };
    let mut request = Vec::with_capacity(command.len() + 1);
    request.extend_from_slice(command.as_bytes());
    request.push(TERMINATOR);
    request
}
