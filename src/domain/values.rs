//! Payload decoding and display formatting for characteristic values.

use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Turns a raw notification payload into a numeric sample
pub trait ValueDecoder: Send + Sync {
    /// `None` means the payload is malformed and the frame is dropped
    fn decode(&self, raw: &[u8]) -> Option<f64>;
}

/// Heart Rate Measurement (0x2A37)
///
/// ```text
/// [0]     : Flags, bit 0 set = 16-bit heart rate value
/// [1]     : Heart rate (u8), or
/// [1-2]   : Heart rate (u16 little-endian)
/// [..]    : Energy expended / RR intervals (ignored)
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct HeartRateDecoder;

impl ValueDecoder for HeartRateDecoder {
    fn decode(&self, raw: &[u8]) -> Option<f64> {
        let flags = *raw.first()?;
        if flags & 0x01 != 0 {
            let bytes = raw.get(1..3)?;
            Some(u16::from_le_bytes([bytes[0], bytes[1]]) as f64)
        } else {
            raw.get(1).map(|&bpm| bpm as f64)
        }
    }
}

/// Little-endian unsigned integer of up to 8 bytes
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsignedDecoder;

impl ValueDecoder for UnsignedDecoder {
    fn decode(&self, raw: &[u8]) -> Option<f64> {
        if raw.is_empty() || raw.len() > 8 {
            return None;
        }
        let mut bytes = [0u8; 8];
        bytes[..raw.len()].copy_from_slice(raw);
        Some(u64::from_le_bytes(bytes) as f64)
    }
}

/// Textual rendering of raw payloads on the console
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    #[default]
    Dec,
    Hex,
    Utf8,
    Utf16,
    Binary,
}

pub fn format_value(raw: &[u8], format: DataFormat) -> String {
    match format {
        DataFormat::Dec => raw
            .iter()
            .map(|b| b.to_string())
            .collect::<Vec<_>>()
            .join(" "),
        DataFormat::Hex => raw
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(" "),
        DataFormat::Utf8 => String::from_utf8_lossy(raw).into_owned(),
        DataFormat::Utf16 => {
            let units: Vec<u16> = raw
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        DataFormat::Binary => {
            let mut out = String::with_capacity(raw.len() * 9);
            for (i, b) in raw.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                let _ = write!(out, "{:08b}", b);
            }
            out
        }
    }
}
