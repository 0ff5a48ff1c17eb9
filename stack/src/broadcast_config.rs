//! Broadcast audio configuration presets and announcement serialization.

use log::warn;

use crate::ltv::{
    audio_location, codec_types, frame_duration, sampling_frequency, AudioContexts,
    LeAudioContextType, LtvMap,
};

pub type BroadcastId = u32;

/// Broadcast ids are 24-bit values; zero is reserved as the invalid marker.
pub const INVALID_BROADCAST_ID: BroadcastId = 0;
pub const BROADCAST_ID_MAX: BroadcastId = 0x00ff_ffff;

/// 16-bit service UUIDs carried in the announcement service data.
pub const BROADCAST_AUDIO_SERVICE_UUID: u16 = 0x1852;
pub const BASIC_AUDIO_SERVICE_UUID: u16 = 0x1851;
pub const PUBLIC_BROADCAST_SERVICE_UUID: u16 = 0x1856;

const AD_TYPE_SERVICE_DATA_16: u8 = 0x16;
const AD_TYPE_BROADCAST_NAME: u8 = 0x30;

/// Public broadcast announcement feature bits.
pub const FEATURE_ENCRYPTED: u8 = 1 << 0;
pub const FEATURE_STANDARD_QUALITY: u8 = 1 << 1;
pub const FEATURE_HIGH_QUALITY: u8 = 1 << 2;

pub const PRESENTATION_DELAY_US: u32 = 40000;

/// Codec identifier: coding format plus company and vendor codec ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecId {
    pub format: u8,
    pub company: u16,
    pub vendor: u16,
}

pub const CODEC_ID_LC3: CodecId = CodecId { format: 0x06, company: 0x0000, vendor: 0x0000 };

/// LC3 parameters of one broadcast subgroup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastSubgroupCodecConfig {
    pub num_bis: u8,
    pub sampling_rate_hz: u32,
    pub frame_duration_us: u32,
    pub octets_per_codec_frame: u16,
    pub bits_per_sample: u8,
    pub codec_frames_per_sdu: u8,
}

impl BroadcastSubgroupCodecConfig {
    /// The codec specific configuration LTVs announced for this subgroup.
    pub fn to_ltv(&self) -> LtvMap {
        let mut ltv = LtvMap::new();
        if let Some(code) = sampling_frequency_code(self.sampling_rate_hz) {
            ltv.insert_u8(codec_types::SAMPLING_FREQUENCY, code);
        }
        if let Some(code) = frame_duration_code(self.frame_duration_us) {
            ltv.insert_u8(codec_types::FRAME_DURATION, code);
        }
        ltv.insert_u16(codec_types::OCTETS_PER_CODEC_FRAME, self.octets_per_codec_frame);
        ltv
    }
}

pub fn sampling_frequency_code(rate_hz: u32) -> Option<u8> {
    match rate_hz {
        16000 => Some(sampling_frequency::FREQ_16000),
        24000 => Some(sampling_frequency::FREQ_24000),
        32000 => Some(sampling_frequency::FREQ_32000),
        48000 => Some(sampling_frequency::FREQ_48000),
        _ => None,
    }
}

pub fn frame_duration_code(duration_us: u32) -> Option<u8> {
    match duration_us {
        7500 => Some(frame_duration::DUR_7500),
        10000 => Some(frame_duration::DUR_10000),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastQosConfig {
    pub retransmission_number: u8,
    pub max_transport_latency_ms: u16,
}

const QOS_2_10: BroadcastQosConfig =
    BroadcastQosConfig { retransmission_number: 2, max_transport_latency_ms: 10 };
const QOS_4_45: BroadcastQosConfig =
    BroadcastQosConfig { retransmission_number: 4, max_transport_latency_ms: 45 };
const QOS_4_50: BroadcastQosConfig =
    BroadcastQosConfig { retransmission_number: 4, max_transport_latency_ms: 50 };
const QOS_4_60: BroadcastQosConfig =
    BroadcastQosConfig { retransmission_number: 4, max_transport_latency_ms: 60 };
const QOS_4_65: BroadcastQosConfig =
    BroadcastQosConfig { retransmission_number: 4, max_transport_latency_ms: 65 };

/// High-reliability QoS by sampling rate and frame duration.
pub fn high_reliability_qos(sampling_rate_hz: u32, frame_duration_us: u32) -> BroadcastQosConfig {
    match (sampling_rate_hz, frame_duration_us) {
        (16000 | 24000 | 32000, 7500) => QOS_4_45,
        (16000 | 24000 | 32000, _) => QOS_4_60,
        (_, 7500) => QOS_4_50,
        (_, _) => QOS_4_65,
    }
}

/// ISO data path: HCI path, transparent controller codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastDataPathConfig {
    pub data_path_id: u8,
    pub codec_id: [u8; 5],
    pub controller_delay_us: u32,
}

impl Default for BroadcastDataPathConfig {
    fn default() -> Self {
        Self { data_path_id: 0x00, codec_id: [0x03, 0x00, 0x00, 0x00, 0x00], controller_delay_us: 0 }
    }
}

/// Complete configuration of one BIG.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastConfiguration {
    pub subgroups: Vec<BroadcastSubgroupCodecConfig>,
    pub qos: BroadcastQosConfig,
    pub data_path: BroadcastDataPathConfig,
    pub sdu_interval_us: u32,
    pub max_sdu_octets: u16,
    pub phy: u8,
    pub packing: u8,
    pub framing: u8,
}

impl BroadcastConfiguration {
    pub fn num_bis_total(&self) -> u8 {
        self.subgroups.iter().map(|s| s.num_bis).sum()
    }

    /// Highest sampling rate across subgroups.
    pub fn sampling_rate_hz(&self) -> u32 {
        self.subgroups.iter().map(|s| s.sampling_rate_hz).max().unwrap_or(0)
    }
}

fn subgroup(num_bis: u8, rate: u32, duration: u32, octets: u16) -> BroadcastSubgroupCodecConfig {
    BroadcastSubgroupCodecConfig {
        num_bis,
        sampling_rate_hz: rate,
        frame_duration_us: duration,
        octets_per_codec_frame: octets,
        bits_per_sample: 16,
        codec_frames_per_sdu: 1,
    }
}

pub fn lc3_mono_16_2() -> BroadcastSubgroupCodecConfig {
    subgroup(1, 16000, 10000, 40)
}

pub fn lc3_stereo_16_2() -> BroadcastSubgroupCodecConfig {
    subgroup(2, 16000, 10000, 40)
}

pub fn lc3_stereo_24_2() -> BroadcastSubgroupCodecConfig {
    subgroup(2, 24000, 10000, 60)
}

pub fn lc3_stereo_48_1() -> BroadcastSubgroupCodecConfig {
    subgroup(2, 48000, 7500, 75)
}

pub fn lc3_stereo_48_2() -> BroadcastSubgroupCodecConfig {
    subgroup(2, 48000, 10000, 100)
}

pub fn lc3_stereo_48_3() -> BroadcastSubgroupCodecConfig {
    subgroup(2, 48000, 7500, 90)
}

pub fn lc3_stereo_48_4() -> BroadcastSubgroupCodecConfig {
    subgroup(2, 48000, 10000, 120)
}

fn preset(
    subgroup: BroadcastSubgroupCodecConfig,
    qos: BroadcastQosConfig,
    max_sdu_octets: u16,
) -> BroadcastConfiguration {
    BroadcastConfiguration {
        subgroups: vec![subgroup],
        qos,
        data_path: BroadcastDataPathConfig::default(),
        sdu_interval_us: 10000,
        max_sdu_octets,
        phy: 0x02,
        packing: 0,
        framing: 0,
    }
}

pub fn lc3_mono_16_2_1() -> BroadcastConfiguration {
    preset(lc3_mono_16_2(), QOS_2_10, 40)
}

pub fn lc3_mono_16_2_2() -> BroadcastConfiguration {
    preset(lc3_mono_16_2(), QOS_4_60, 40)
}

pub fn lc3_stereo_16_2_2() -> BroadcastConfiguration {
    preset(lc3_stereo_16_2(), QOS_4_60, 80)
}

pub fn lc3_stereo_24_2_1() -> BroadcastConfiguration {
    preset(lc3_stereo_24_2(), QOS_2_10, 120)
}

pub fn lc3_stereo_24_2_2() -> BroadcastConfiguration {
    preset(lc3_stereo_24_2(), QOS_4_60, 120)
}

pub fn lc3_stereo_48_1_2() -> BroadcastConfiguration {
    preset(lc3_stereo_48_1(), QOS_4_50, 150)
}

pub fn lc3_stereo_48_2_2() -> BroadcastConfiguration {
    preset(lc3_stereo_48_2(), QOS_4_65, 200)
}

pub fn lc3_stereo_48_3_2() -> BroadcastConfiguration {
    preset(lc3_stereo_48_3(), QOS_4_50, 180)
}

pub fn lc3_stereo_48_4_2() -> BroadcastConfiguration {
    preset(lc3_stereo_48_4(), QOS_4_65, 240)
}

/// Software (host encoded) broadcast configuration selection by context.
///
/// `test_preset` forces one of the `lc3_stereo_48_*_2` presets by name, used
/// by qualification test setups only.
pub fn get_broadcast_config(
    contexts: &AudioContexts,
    test_preset: Option<&str>,
) -> BroadcastConfiguration {
    if let Some(name) = test_preset {
        match name {
            "lc3_stereo_48_1_2" => return lc3_stereo_48_1_2(),
            "lc3_stereo_48_2_2" => return lc3_stereo_48_2_2(),
            "lc3_stereo_48_3_2" => return lc3_stereo_48_3_2(),
            "lc3_stereo_48_4_2" => return lc3_stereo_48_4_2(),
            name => warn!("unknown test preset {}, ignoring", name),
        }
    }

    if contexts.contains(LeAudioContextType::Game) || contexts.contains(LeAudioContextType::Live) {
        lc3_stereo_24_2_1()
    } else if contexts.contains(LeAudioContextType::Instructional) {
        lc3_mono_16_2_1()
    } else if contexts.contains(LeAudioContextType::SoundEffects)
        || contexts.contains(LeAudioContextType::Unspecified)
    {
        lc3_stereo_16_2_2()
    } else if contexts.contains(LeAudioContextType::Alerts)
        || contexts.contains(LeAudioContextType::Notifications)
        || contexts.contains(LeAudioContextType::EmergencyAlarm)
    {
        lc3_mono_16_2_2()
    } else if contexts.contains(LeAudioContextType::Media) {
        lc3_stereo_24_2_2()
    } else {
        lc3_mono_16_2_2()
    }
}

/// One BIS entry of a basic audio announcement subgroup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicAudioAnnouncementBisConfig {
    pub bis_index: u8,
    pub codec_specific_params: LtvMap,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicAudioAnnouncementSubgroup {
    pub codec_id: CodecId,
    pub codec_specific_params: LtvMap,
    pub metadata: LtvMap,
    pub bis_configs: Vec<BasicAudioAnnouncementBisConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicAudioAnnouncementData {
    pub presentation_delay_us: u32,
    pub subgroups: Vec<BasicAudioAnnouncementSubgroup>,
}

impl BasicAudioAnnouncementData {
    /// Serializes the BASE structure.
    pub fn to_raw_packet(&self) -> Vec<u8> {
        let mut raw = vec![];
        raw.extend_from_slice(&self.presentation_delay_us.to_le_bytes()[0..3]);
        raw.push(self.subgroups.len() as u8);

        for subgroup in &self.subgroups {
            raw.push(subgroup.bis_configs.len() as u8);
            raw.push(subgroup.codec_id.format);
            raw.extend_from_slice(&subgroup.codec_id.company.to_le_bytes());
            raw.extend_from_slice(&subgroup.codec_id.vendor.to_le_bytes());

            let codec_params = subgroup.codec_specific_params.to_raw();
            raw.push(codec_params.len() as u8);
            raw.extend_from_slice(&codec_params);

            let metadata = subgroup.metadata.to_raw();
            raw.push(metadata.len() as u8);
            raw.extend_from_slice(&metadata);

            for bis in &subgroup.bis_configs {
                let params = bis.codec_specific_params.to_raw();
                raw.push(bis.bis_index);
                raw.push(params.len() as u8);
                raw.extend_from_slice(&params);
            }
        }
        raw
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicBroadcastAnnouncementData {
    pub features: u8,
    pub metadata: LtvMap,
}

/// Builds the extended advertising payload: broadcast audio announcement,
/// optional public broadcast announcement, and the broadcast name AD.
pub fn prepare_advertising_data(
    broadcast_id: BroadcastId,
    broadcast_name: &str,
    public: Option<&PublicBroadcastAnnouncementData>,
) -> Vec<u8> {
    let mut data = vec![
        6,
        AD_TYPE_SERVICE_DATA_16,
        (BROADCAST_AUDIO_SERVICE_UUID & 0xff) as u8,
        (BROADCAST_AUDIO_SERVICE_UUID >> 8) as u8,
    ];
    data.extend_from_slice(&broadcast_id.to_le_bytes()[0..3]);

    if let Some(public) = public {
        let metadata = public.metadata.to_raw();
        data.push((5 + metadata.len()) as u8);
        data.push(AD_TYPE_SERVICE_DATA_16);
        data.push((PUBLIC_BROADCAST_SERVICE_UUID & 0xff) as u8);
        data.push((PUBLIC_BROADCAST_SERVICE_UUID >> 8) as u8);
        data.push(public.features);
        data.push(metadata.len() as u8);
        data.extend_from_slice(&metadata);
    }

    let name = broadcast_name.as_bytes();
    data.push((name.len() + 1) as u8);
    data.push(AD_TYPE_BROADCAST_NAME);
    data.extend_from_slice(name);

    data
}

/// Builds the periodic advertising payload carrying the BASE.
pub fn prepare_periodic_data(announcement: &BasicAudioAnnouncementData) -> Vec<u8> {
    let raw = announcement.to_raw_packet();
    let mut data = vec![
        (3 + raw.len()) as u8,
        AD_TYPE_SERVICE_DATA_16,
        (BASIC_AUDIO_SERVICE_UUID & 0xff) as u8,
        (BASIC_AUDIO_SERVICE_UUID >> 8) as u8,
    ];
    data.extend_from_slice(&raw);
    data
}

/// Builds the BASE for a broadcast configuration, one metadata map per
/// subgroup. Stereo subgroups split into left/right BISes, mono announces
/// front-center.
pub fn build_basic_announcement(
    config: &BroadcastConfiguration,
    subgroup_metadata: &[LtvMap],
) -> BasicAudioAnnouncementData {
    let mut bis_index = 1u8;
    let subgroups = config
        .subgroups
        .iter()
        .enumerate()
        .map(|(i, subgroup)| {
            let bis_configs = (0..subgroup.num_bis)
                .map(|n| {
                    let mut params = LtvMap::new();
                    let allocation = match (subgroup.num_bis, n) {
                        (1, _) => audio_location::FRONT_CENTER,
                        (_, 0) => audio_location::FRONT_LEFT,
                        (_, _) => audio_location::FRONT_RIGHT,
                    };
                    params.insert_u32(codec_types::AUDIO_CHANNEL_ALLOCATION, allocation);
                    let bis = BasicAudioAnnouncementBisConfig {
                        bis_index,
                        codec_specific_params: params,
                    };
                    bis_index += 1;
                    bis
                })
                .collect();

            BasicAudioAnnouncementSubgroup {
                codec_id: CODEC_ID_LC3,
                codec_specific_params: subgroup.to_ltv(),
                metadata: subgroup_metadata.get(i).cloned().unwrap_or_default(),
                bis_configs,
            }
        })
        .collect();

    BasicAudioAnnouncementData { presentation_delay_us: PRESENTATION_DELAY_US, subgroups }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ltv::metadata_types;

    #[test]
    fn test_context_to_preset() {
        let mut contexts = AudioContexts::none();
        contexts.add(LeAudioContextType::Game);
        assert_eq!(get_broadcast_config(&contexts, None), lc3_stereo_24_2_1());

        let mut contexts = AudioContexts::none();
        contexts.add(LeAudioContextType::Media);
        assert_eq!(get_broadcast_config(&contexts, None), lc3_stereo_24_2_2());

        let mut contexts = AudioContexts::none();
        contexts.add(LeAudioContextType::Alerts);
        assert_eq!(get_broadcast_config(&contexts, None), lc3_mono_16_2_2());

        // Low latency wins over media when both are present.
        let mut contexts = AudioContexts::none();
        contexts.add(LeAudioContextType::Media);
        contexts.add(LeAudioContextType::Live);
        assert_eq!(get_broadcast_config(&contexts, None), lc3_stereo_24_2_1());

        assert_eq!(get_broadcast_config(&AudioContexts::none(), None), lc3_mono_16_2_2());
    }

    #[test]
    fn test_test_preset_override() {
        let mut contexts = AudioContexts::none();
        contexts.add(LeAudioContextType::Media);
        assert_eq!(
            get_broadcast_config(&contexts, Some("lc3_stereo_48_3_2")),
            lc3_stereo_48_3_2()
        );
        // Unknown preset names fall through to context selection.
        assert_eq!(get_broadcast_config(&contexts, Some("bogus")), lc3_stereo_24_2_2());
    }

    #[test]
    fn test_high_reliability_qos() {
        assert_eq!(high_reliability_qos(16000, 7500), QOS_4_45);
        assert_eq!(high_reliability_qos(32000, 10000), QOS_4_60);
        assert_eq!(high_reliability_qos(48000, 7500), QOS_4_50);
        assert_eq!(high_reliability_qos(48000, 10000), QOS_4_65);
    }

    #[test]
    fn test_base_serialization() {
        let mut metadata = LtvMap::new();
        metadata.insert_u16(metadata_types::STREAMING_AUDIO_CONTEXTS, 0x0004);
        let announcement = build_basic_announcement(&lc3_mono_16_2_2(), &[metadata]);
        let raw = announcement.to_raw_packet();

        let expected = [
            0x40, 0x9c, 0x00, // presentation delay 40000 us
            0x01, // one subgroup
            0x01, // one BIS
            0x06, 0x00, 0x00, 0x00, 0x00, // LC3
            0x0a, // codec specific params length
            0x02, 0x01, 0x03, // sampling frequency 16 kHz
            0x02, 0x02, 0x01, // frame duration 10 ms
            0x03, 0x04, 0x28, 0x00, // 40 octets per frame
            0x04, // metadata length
            0x03, 0x02, 0x04, 0x00, // streaming contexts: media
            0x01, // BIS index
            0x06, // BIS params length
            0x05, 0x03, 0x04, 0x00, 0x00, 0x00, // front center
        ];
        assert_eq!(raw, expected);
    }

    #[test]
    fn test_advertising_data() {
        let public = PublicBroadcastAnnouncementData {
            features: FEATURE_HIGH_QUALITY,
            metadata: LtvMap::new(),
        };
        let data = prepare_advertising_data(0x123456, "bc", Some(&public));
        let expected = [
            6, 0x16, 0x52, 0x18, 0x56, 0x34, 0x12, // broadcast audio announcement
            5, 0x16, 0x56, 0x18, 0x04, 0x00, // public broadcast announcement
            3, 0x30, b'b', b'c', // broadcast name
        ];
        assert_eq!(data, expected);
    }

    #[test]
    fn test_periodic_data() {
        let announcement =
            BasicAudioAnnouncementData { presentation_delay_us: 40000, subgroups: vec![] };
        let data = prepare_periodic_data(&announcement);
        assert_eq!(data, [7, 0x16, 0x51, 0x18, 0x40, 0x9c, 0x00, 0x00]);
    }
}
