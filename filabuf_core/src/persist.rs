//! Non-volatile state blob.
//!
//! Layout: `magic: u32 LE`, `version: u16 LE`, then a UTF-8 TOML document
//! holding the per-channel direction and calibration records.

use filabuf_traits::CHANNELS;
use serde::{Deserialize, Serialize};

use crate::error::PersistError;

pub const STATE_MAGIC: u32 = 0x4061_4061;
pub const STATE_VERSION: u16 = 1;
const HEADER_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedCalibration {
    pub zero_v: f32,
    pub positive_range_v: f32,
    pub negative_range_v: f32,
    pub samples: u32,
    pub calibrated: bool,
}

impl PersistedCalibration {
    /// Whether the record carries a usable zero point and ranges.
    pub fn is_plausible(&self, min_valid_v: f32, max_valid_v: f32) -> bool {
        let range_ok = |r: f32| r.is_finite() && r > 0.0;
        self.zero_v.is_finite()
            && (min_valid_v..=max_valid_v).contains(&self.zero_v)
            && range_ok(self.positive_range_v)
            && range_ok(self.negative_range_v)
    }
}

impl Default for PersistedCalibration {
    fn default() -> Self {
        Self {
            zero_v: 1.65,
            positive_range_v: 0.6,
            negative_range_v: 0.6,
            samples: 0,
            calibrated: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedChannel {
    /// Motor polarity sign; zero decodes as forward.
    pub direction: i8,
    /// Set by correlation learning.
    pub learned: bool,
    /// Set once an insertion confirmed the loading polarity.
    pub loading_confirmed: bool,
    pub calibration: PersistedCalibration,
}

impl Default for PersistedChannel {
    fn default() -> Self {
        Self {
            direction: 1,
            learned: false,
            loading_confirmed: false,
            calibration: PersistedCalibration::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedState {
    pub channels: Vec<PersistedChannel>,
}

impl PersistedState {
    pub fn defaults() -> Self {
        Self {
            channels: vec![PersistedChannel::default(); CHANNELS],
        }
    }

    /// Pad or truncate to exactly one record per channel.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.channels.resize_with(CHANNELS, PersistedChannel::default);
        self
    }
}

pub fn encode(state: &PersistedState) -> Result<Vec<u8>, PersistError> {
    let payload = toml::to_string(state).map_err(|e| PersistError::Payload(e.to_string()))?;
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&STATE_MAGIC.to_le_bytes());
    out.extend_from_slice(&STATE_VERSION.to_le_bytes());
    out.extend_from_slice(payload.as_bytes());
    Ok(out)
}

pub fn decode(blob: &[u8]) -> Result<PersistedState, PersistError> {
    let (Some(magic), Some(version), Some(payload)) =
        (blob.get(0..4), blob.get(4..6), blob.get(HEADER_LEN..))
    else {
        return Err(PersistError::Truncated(blob.len()));
    };

    let magic = u32::from_le_bytes([magic[0], magic[1], magic[2], magic[3]]);
    if magic != STATE_MAGIC {
        return Err(PersistError::BadMagic(magic));
    }
    let version = u16::from_le_bytes([version[0], version[1]]);
    if version != STATE_VERSION {
        return Err(PersistError::UnsupportedVersion(version));
    }

    let text = std::str::from_utf8(payload).map_err(|e| PersistError::Payload(e.to_string()))?;
    let state: PersistedState =
        toml::from_str(text).map_err(|e| PersistError::Payload(e.to_string()))?;
    Ok(state.normalized())
}
