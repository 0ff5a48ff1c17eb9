//! LTV (length-type-value) structures used by the LE Audio announcements and
//! codec configuration metadata, plus the audio context bitset.

use std::collections::BTreeMap;

use log::warn;
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;

/// Codec specific configuration LTV types (Assigned Numbers 6.12.5).
pub mod codec_types {
    pub const SAMPLING_FREQUENCY: u8 = 0x01;
    pub const FRAME_DURATION: u8 = 0x02;
    pub const AUDIO_CHANNEL_ALLOCATION: u8 = 0x03;
    pub const OCTETS_PER_CODEC_FRAME: u8 = 0x04;
    pub const CODEC_FRAME_BLOCKS_PER_SDU: u8 = 0x05;
}

/// Metadata LTV types (Assigned Numbers 6.12.6).
pub mod metadata_types {
    pub const PREFERRED_AUDIO_CONTEXTS: u8 = 0x01;
    pub const STREAMING_AUDIO_CONTEXTS: u8 = 0x02;
    pub const PROGRAM_INFO: u8 = 0x03;
    pub const CCID_LIST: u8 = 0x05;
}

/// Sampling frequency config values.
pub mod sampling_frequency {
    pub const FREQ_16000: u8 = 0x03;
    pub const FREQ_24000: u8 = 0x05;
    pub const FREQ_32000: u8 = 0x06;
    pub const FREQ_48000: u8 = 0x08;
}

/// Frame duration config values.
pub mod frame_duration {
    pub const DUR_7500: u8 = 0x00;
    pub const DUR_10000: u8 = 0x01;
}

/// Audio location bits for the channel allocation LTV.
pub mod audio_location {
    pub const FRONT_LEFT: u32 = 0x00000001;
    pub const FRONT_RIGHT: u32 = 0x00000002;
    pub const FRONT_CENTER: u32 = 0x00000004;
    pub const STEREO: u32 = FRONT_LEFT | FRONT_RIGHT;
}

/// LE Audio context types, one bit each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
#[repr(u16)]
pub enum LeAudioContextType {
    Unspecified = 0x0001,
    Conversational = 0x0002,
    Media = 0x0004,
    Game = 0x0008,
    Instructional = 0x0010,
    VoiceAssistants = 0x0020,
    Live = 0x0040,
    SoundEffects = 0x0080,
    Notifications = 0x0100,
    Ringtone = 0x0200,
    Alerts = 0x0400,
    EmergencyAlarm = 0x0800,
    Rfu = 0x1000,
}

/// Bitset of [`LeAudioContextType`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AudioContexts(pub u16);

impl AudioContexts {
    pub fn none() -> Self {
        Self(0)
    }

    pub fn contains(&self, context: LeAudioContextType) -> bool {
        self.0 & (context as u16) != 0
    }

    pub fn add(&mut self, context: LeAudioContextType) {
        self.0 |= context as u16;
    }

    pub fn add_all(&mut self, other: AudioContexts) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, context: LeAudioContextType) {
        self.0 &= !(context as u16);
    }

    pub fn any(&self) -> bool {
        self.0 != 0
    }

    /// Iterates over the context types present in the set, unknown bits
    /// skipped.
    pub fn iter(&self) -> impl Iterator<Item = LeAudioContextType> + '_ {
        (0..16).filter_map(|bit| {
            let value = self.0 & (1 << bit);
            (value != 0).then(|| LeAudioContextType::from_u16(value)).flatten()
        })
    }
}

impl From<LeAudioContextType> for AudioContexts {
    fn from(context: LeAudioContextType) -> Self {
        Self(context as u16)
    }
}

/// An LTV payload held as a type → value map, iteration ordered by type.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LtvMap {
    entries: BTreeMap<u8, Vec<u8>>,
}

impl LtvMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses raw LTV bytes. A zero length octet terminates the payload
    /// (padding); an entry running past the end of the buffer fails the
    /// whole parse.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let mut entries = BTreeMap::new();
        let mut pos = 0;
        while pos < data.len() {
            let len = data[pos] as usize;
            if len == 0 {
                break;
            }
            if pos + 1 + len > data.len() {
                warn!("truncated LTV entry at offset {}", pos);
                return None;
            }
            let entry_type = data[pos + 1];
            entries.insert(entry_type, data[pos + 2..pos + 1 + len].to_vec());
            pos += 1 + len;
        }
        Some(Self { entries })
    }

    /// Serializes the map back into raw LTV bytes.
    pub fn to_raw(&self) -> Vec<u8> {
        let mut raw = vec![];
        for (entry_type, value) in &self.entries {
            raw.push((value.len() + 1) as u8);
            raw.push(*entry_type);
            raw.extend_from_slice(value);
        }
        raw
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, entry_type: u8) -> Option<&[u8]> {
        self.entries.get(&entry_type).map(|v| v.as_slice())
    }

    pub fn insert(&mut self, entry_type: u8, value: Vec<u8>) {
        self.entries.insert(entry_type, value);
    }

    pub fn remove(&mut self, entry_type: u8) {
        self.entries.remove(&entry_type);
    }

    pub fn get_u8(&self, entry_type: u8) -> Option<u8> {
        match self.get(entry_type)? {
            [v] => Some(*v),
            _ => None,
        }
    }

    pub fn get_u16(&self, entry_type: u8) -> Option<u16> {
        match self.get(entry_type)? {
            [lo, hi] => Some(u16::from_le_bytes([*lo, *hi])),
            _ => None,
        }
    }

    pub fn get_u32(&self, entry_type: u8) -> Option<u32> {
        match self.get(entry_type)? {
            [b0, b1, b2, b3] => Some(u32::from_le_bytes([*b0, *b1, *b2, *b3])),
            _ => None,
        }
    }

    pub fn insert_u8(&mut self, entry_type: u8, value: u8) {
        self.insert(entry_type, vec![value]);
    }

    pub fn insert_u16(&mut self, entry_type: u8, value: u16) {
        self.insert(entry_type, value.to_le_bytes().to_vec());
    }

    pub fn insert_u32(&mut self, entry_type: u8, value: u32) {
        self.insert(entry_type, value.to_le_bytes().to_vec());
    }

    /// The streaming audio contexts metadata entry, if present.
    pub fn streaming_audio_contexts(&self) -> Option<AudioContexts> {
        Some(AudioContexts(self.get_u16(metadata_types::STREAMING_AUDIO_CONTEXTS)?))
    }

    /// The CCID list metadata entry, if present.
    pub fn ccid_list(&self) -> Option<&[u8]> {
        self.get(metadata_types::CCID_LIST)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_serialize() {
        let raw = [0x02, 0x01, 0x08, 0x03, 0x02, 0x04, 0x00];
        let ltv = LtvMap::parse(&raw).unwrap();
        assert_eq!(ltv.get_u8(codec_types::SAMPLING_FREQUENCY), Some(0x08));
        assert_eq!(ltv.get_u16(codec_types::FRAME_DURATION), Some(0x0004));
        assert_eq!(ltv.to_raw(), raw);
    }

    #[test]
    fn test_parse_zero_length_terminates() {
        let raw = [0x02, 0x01, 0x03, 0x00, 0xff, 0xff];
        let ltv = LtvMap::parse(&raw).unwrap();
        assert_eq!(ltv.get_u8(codec_types::SAMPLING_FREQUENCY), Some(0x03));
        assert_eq!(ltv.to_raw(), [0x02, 0x01, 0x03]);
    }

    #[test]
    fn test_parse_truncated_fails() {
        assert!(LtvMap::parse(&[0x02, 0x01]).is_none());
        assert!(LtvMap::parse(&[0x05, 0x02, 0x00, 0x01]).is_none());
    }

    #[test]
    fn test_typed_accessors() {
        let mut ltv = LtvMap::new();
        ltv.insert_u16(metadata_types::STREAMING_AUDIO_CONTEXTS, 0x0044);
        ltv.insert(metadata_types::CCID_LIST, vec![1, 2]);

        let contexts = ltv.streaming_audio_contexts().unwrap();
        assert!(contexts.contains(LeAudioContextType::Media));
        assert!(contexts.contains(LeAudioContextType::Live));
        assert!(!contexts.contains(LeAudioContextType::Game));
        assert_eq!(ltv.ccid_list(), Some(&[1, 2][..]));
    }

    #[test]
    fn test_contexts_iter() {
        let mut contexts = AudioContexts::none();
        contexts.add(LeAudioContextType::Alerts);
        contexts.add(LeAudioContextType::Media);
        let collected: Vec<_> = contexts.iter().collect();
        assert_eq!(collected, vec![LeAudioContextType::Media, LeAudioContextType::Alerts]);
    }
}
