//! Codec location aware configuration management: unicast audio set
//! selection, offloaded broadcast configuration ranking, CIS channel
//! allocation maps and the active audio configuration fan-out.

use log::{info, warn};

use crate::audio_config::{AudioSetConfiguration, AudioSetConfigurationProvider, ConfigDirection};
use crate::broadcast_config::{
    self, high_reliability_qos, BroadcastConfiguration, BroadcastSubgroupCodecConfig,
};
use crate::ltv::{audio_location, AudioContexts, LeAudioContextType};

/// Where the LC3 codec runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecLocation {
    /// Software encoding on the host.
    Host,
    /// Offloaded to the audio DSP.
    Adsp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastQuality {
    Standard,
    High,
}

/// One entry of the offloader broadcast capability list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffloadCapability {
    pub sampling_rate_hz: u32,
    pub frame_duration_us: u32,
    pub max_octets_per_frame: u16,
}

/// Stream direction as seen from the local device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamDirection {
    Sink,
    Source,
}

/// One CIS entry of the offloader stream map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CisUnitConfig {
    pub cis_handle: u16,
    pub target_allocation: u32,
    pub current_allocation: u32,
    pub is_initial: bool,
}

/// Active unicast stream parameters of one direction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamParams {
    /// Connected CIS handle → announced audio channel allocation.
    pub stream_locations: Vec<(u16, u32)>,
    pub sampling_rate_hz: u32,
    pub frame_duration_us: u32,
    pub octets_per_frame: u16,
    pub codec_frames_per_sdu: u8,
    pub peer_delay_ms: u32,
}

/// Offloader stream configuration emitted on active-config updates.
#[derive(Debug, Clone, PartialEq)]
pub struct OffloadStreamConfig {
    pub direction: StreamDirection,
    pub stream_map: Vec<(u16, u32)>,
    pub bits_per_sample: u8,
    pub sampling_rate_hz: u32,
    pub frame_duration_us: u32,
    pub octets_per_frame: u16,
    pub blocks_per_sdu: u8,
    pub peer_delay_ms: u32,
}

/// Offloader broadcast stream map: BIS connection handle → allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffloadBroadcastConfig {
    pub stream_map: Vec<(u16, u32)>,
}

pub struct CodecManager {
    codec_location: CodecLocation,
    offload_broadcast_capabilities: Vec<OffloadCapability>,
    sink_cis_configuration: Vec<CisUnitConfig>,
    source_cis_configuration: Vec<CisUnitConfig>,
    test_preset: Option<String>,
}

impl CodecManager {
    pub fn new(
        codec_location: CodecLocation,
        offload_broadcast_capabilities: Vec<OffloadCapability>,
    ) -> Self {
        Self {
            codec_location,
            offload_broadcast_capabilities,
            sink_cis_configuration: vec![],
            source_cis_configuration: vec![],
            test_preset: None,
        }
    }

    pub fn codec_location(&self) -> CodecLocation {
        self.codec_location
    }

    /// Forces a qualification test preset for software broadcast selection.
    pub fn set_test_preset(&mut self, preset: Option<String>) {
        self.test_preset = preset;
    }

    /// Hands the provider's candidate list for the context to the matcher
    /// and returns its selection. A context with no registered
    /// configurations gives the matcher `None`, exactly once.
    pub fn get_codec_config<'a>(
        &self,
        provider: &'a AudioSetConfigurationProvider,
        context: LeAudioContextType,
        matcher: impl FnOnce(Option<&[&'a AudioSetConfiguration]>) -> Option<&'a AudioSetConfiguration>,
    ) -> Option<&'a AudioSetConfiguration> {
        let candidates = provider.get_configurations(context);
        if candidates.is_empty() {
            matcher(None)
        } else {
            matcher(Some(&candidates))
        }
    }

    /// Selects the broadcast configuration for the requested per-subgroup
    /// qualities and audio contexts.
    ///
    /// A single standard-quality subgroup caps the whole BIG at standard.
    /// Returns `None` when the offloader supports no candidate, which must
    /// fail the broadcast creation.
    pub fn get_broadcast_config(
        &self,
        subgroup_quality: &[BroadcastQuality],
        contexts: &AudioContexts,
    ) -> Option<BroadcastConfiguration> {
        match self.codec_location {
            CodecLocation::Host => {
                Some(broadcast_config::get_broadcast_config(contexts, self.test_preset.as_deref()))
            }
            CodecLocation::Adsp => self.rank_offload_broadcast_config(subgroup_quality),
        }
    }

    fn rank_offload_broadcast_config(
        &self,
        subgroup_quality: &[BroadcastQuality],
    ) -> Option<BroadcastConfiguration> {
        let quality = if subgroup_quality.contains(&BroadcastQuality::Standard) {
            BroadcastQuality::Standard
        } else {
            BroadcastQuality::High
        };

        let candidates: &[(fn() -> BroadcastSubgroupCodecConfig, u16)] = match quality {
            BroadcastQuality::High => &[
                (broadcast_config::lc3_stereo_48_4, 120),
                (broadcast_config::lc3_stereo_48_2, 100),
                (broadcast_config::lc3_stereo_24_2, 60),
                (broadcast_config::lc3_stereo_16_2, 40),
            ],
            BroadcastQuality::Standard => {
                &[(broadcast_config::lc3_stereo_24_2, 60), (broadcast_config::lc3_stereo_16_2, 40)]
            }
        };

        for (make_subgroup, min_octets) in candidates {
            let subgroup = make_subgroup();
            let supported = self.offload_broadcast_capabilities.iter().any(|cap| {
                cap.sampling_rate_hz == subgroup.sampling_rate_hz
                    && cap.frame_duration_us == subgroup.frame_duration_us
                    && cap.max_octets_per_frame >= *min_octets
            });
            if supported {
                return Some(self.subgroup_to_configuration(subgroup));
            }
        }

        warn!("no offload capability matches any broadcast candidate");
        None
    }

    fn subgroup_to_configuration(
        &self,
        subgroup: BroadcastSubgroupCodecConfig,
    ) -> BroadcastConfiguration {
        let qos = high_reliability_qos(subgroup.sampling_rate_hz, subgroup.frame_duration_us);
        let max_sdu_octets = subgroup.octets_per_codec_frame * subgroup.codec_frames_per_sdu as u16;
        let sdu_interval_us = subgroup.frame_duration_us * subgroup.codec_frames_per_sdu as u32;
        BroadcastConfiguration {
            subgroups: vec![subgroup],
            qos,
            data_path: Default::default(),
            sdu_interval_us,
            max_sdu_octets,
            phy: 0x02,
            packing: 0,
            framing: 0,
        }
    }

    /// Rebuilds the offloader CIS map of one direction.
    ///
    /// `cis_handles` lists every CIS of the direction's type;
    /// `stream_locations` the connected ones with their announced channel
    /// allocations. While not all CISes are connected the current allocation
    /// reads stereo so the offloader mixes to mono.
    pub fn update_cis_configuration(
        &mut self,
        cis_handles: &[u16],
        stream_locations: &[(u16, u32)],
        direction: StreamDirection,
    ) {
        if self.codec_location != CodecLocation::Adsp {
            return;
        }

        let taken: u32 = stream_locations.iter().map(|(_, allocation)| allocation).sum();
        let all_connected = stream_locations.len() == cis_handles.len();

        let entries: Vec<CisUnitConfig> = cis_handles
            .iter()
            .map(|handle| {
                let target_allocation = match stream_locations
                    .iter()
                    .find(|(h, _)| h == handle)
                    .map(|(_, allocation)| *allocation)
                {
                    Some(allocation) => adjust_allocation(allocation),
                    None => audio_location::STEREO & !taken,
                };
                let current_allocation =
                    if all_connected { target_allocation } else { audio_location::STEREO };
                CisUnitConfig {
                    cis_handle: *handle,
                    target_allocation,
                    current_allocation,
                    is_initial: true,
                }
            })
            .collect();

        let stored = match direction {
            StreamDirection::Sink => &mut self.sink_cis_configuration,
            StreamDirection::Source => &mut self.source_cis_configuration,
        };

        let is_initial = stored.is_empty();
        let has_changed = *stored
            != entries
                .iter()
                .cloned()
                .map(|e| CisUnitConfig { is_initial, ..e })
                .collect::<Vec<_>>();
        if !has_changed && !is_initial {
            return;
        }

        *stored = entries.into_iter().map(|e| CisUnitConfig { is_initial, ..e }).collect();
        info!("updated {:?} CIS configuration, {} entries", direction, stored.len());
    }

    pub fn clear_cis_configuration(&mut self, direction: StreamDirection) {
        match direction {
            StreamDirection::Sink => self.sink_cis_configuration.clear(),
            StreamDirection::Source => self.source_cis_configuration.clear(),
        }
    }

    pub fn cis_configuration(&self, direction: StreamDirection) -> &[CisUnitConfig] {
        match direction {
            StreamDirection::Sink => &self.sink_cis_configuration,
            StreamDirection::Source => &self.source_cis_configuration,
        }
    }

    /// Emits the offloader stream configuration for every direction with a
    /// non-empty stream map.
    pub fn update_active_audio_config(
        &self,
        sink: &StreamParams,
        source: &StreamParams,
        mut emit: impl FnMut(OffloadStreamConfig),
    ) {
        if self.codec_location != CodecLocation::Adsp {
            return;
        }
        for (params, direction) in
            [(sink, StreamDirection::Sink), (source, StreamDirection::Source)]
        {
            if params.stream_locations.is_empty() {
                continue;
            }
            emit(OffloadStreamConfig {
                direction,
                stream_map: params.stream_locations.clone(),
                bits_per_sample: 16,
                sampling_rate_hz: params.sampling_rate_hz,
                frame_duration_us: params.frame_duration_us,
                octets_per_frame: params.octets_per_frame,
                blocks_per_sdu: params.codec_frames_per_sdu,
                peer_delay_ms: params.peer_delay_ms,
            });
        }
    }

    /// Maps BIG connection handles to broadcast channel allocations for the
    /// offloader. Stereo configurations map to [front-left, front-right],
    /// mono to [front-center].
    pub fn update_broadcast_conn_handle(
        &self,
        connection_handles: &[u16],
        config: &BroadcastConfiguration,
    ) -> Option<OffloadBroadcastConfig> {
        if self.codec_location != CodecLocation::Adsp {
            return None;
        }
        let num_bis = config.num_bis_total() as usize;
        if connection_handles.len() != num_bis {
            warn!(
                "connection handle count {} does not match BIS count {}",
                connection_handles.len(),
                num_bis
            );
            return None;
        }

        let stream_map = match connection_handles {
            [left, right] => {
                vec![(*left, audio_location::FRONT_LEFT), (*right, audio_location::FRONT_RIGHT)]
            }
            [center] => vec![(*center, audio_location::FRONT_CENTER)],
            handles => {
                warn!("unsupported broadcast channel count {}", handles.len());
                return None;
            }
        };
        Some(OffloadBroadcastConfig { stream_map })
    }

    /// Whether the configuration is bidirectional super wideband: at least
    /// one 32 kHz setting in each direction.
    pub fn check_codec_config_is_bidir_swb(&self, config: &AudioSetConfiguration) -> bool {
        count_swb(config, ConfigDirection::Sink) >= 1
            && count_swb(config, ConfigDirection::Source) >= 1
    }

    /// Whether the configuration is dual bidirectional super wideband:
    /// strictly more than one 32 kHz setting in each direction.
    pub fn check_codec_config_is_dual_bidir_swb(&self, config: &AudioSetConfiguration) -> bool {
        count_swb(config, ConfigDirection::Sink) > 1
            && count_swb(config, ConfigDirection::Source) > 1
    }
}

fn count_swb(config: &AudioSetConfiguration, direction: ConfigDirection) -> usize {
    config
        .confs
        .iter()
        .filter(|c| c.direction == direction && c.sampling_frequency_hz >= 32000)
        .count()
}

/// Collapses a stream allocation for the offloader: left and right present
/// maps to stereo, a single side stays on its side.
fn adjust_allocation(allocation: u32) -> u32 {
    let left = allocation & audio_location::FRONT_LEFT != 0;
    let right = allocation & audio_location::FRONT_RIGHT != 0;
    match (left, right) {
        (true, true) => audio_location::STEREO,
        (true, false) => audio_location::FRONT_LEFT,
        (false, true) => audio_location::FRONT_RIGHT,
        (false, false) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_config::CodecConfigSetting;

    fn swb_setting(direction: ConfigDirection, rate: u32) -> CodecConfigSetting {
        CodecConfigSetting {
            direction,
            device_count: 1,
            ase_count: 1,
            sampling_frequency_hz: rate,
            frame_duration_us: 7500,
            octets_per_codec_frame: 60,
            audio_channel_allocation: 1,
            codec_frames_per_sdu: 1,
        }
    }

    fn capabilities() -> Vec<OffloadCapability> {
        vec![
            OffloadCapability {
                sampling_rate_hz: 48000,
                frame_duration_us: 10000,
                max_octets_per_frame: 120,
            },
            OffloadCapability {
                sampling_rate_hz: 24000,
                frame_duration_us: 10000,
                max_octets_per_frame: 60,
            },
            OffloadCapability {
                sampling_rate_hz: 16000,
                frame_duration_us: 10000,
                max_octets_per_frame: 40,
            },
        ]
    }

    #[test]
    fn test_offload_ranking_prefers_48_4() {
        let manager = CodecManager::new(CodecLocation::Adsp, capabilities());
        let config = manager
            .get_broadcast_config(&[BroadcastQuality::High], &AudioContexts::none())
            .unwrap();
        assert_eq!(config.subgroups[0].sampling_rate_hz, 48000);
        assert_eq!(config.subgroups[0].octets_per_codec_frame, 120);
        assert_eq!(config.qos, broadcast_config::high_reliability_qos(48000, 10000));
    }

    #[test]
    fn test_offload_ranking_standard_caps_big() {
        let manager = CodecManager::new(CodecLocation::Adsp, capabilities());
        let config = manager
            .get_broadcast_config(
                &[BroadcastQuality::High, BroadcastQuality::Standard],
                &AudioContexts::none(),
            )
            .unwrap();
        assert_eq!(config.subgroups[0].sampling_rate_hz, 24000);
    }

    #[test]
    fn test_offload_ranking_skips_unsupported() {
        let mut caps = capabilities();
        caps.retain(|c| c.sampling_rate_hz != 48000);
        let manager = CodecManager::new(CodecLocation::Adsp, caps);
        let config = manager
            .get_broadcast_config(&[BroadcastQuality::High], &AudioContexts::none())
            .unwrap();
        assert_eq!(config.subgroups[0].sampling_rate_hz, 24000);
    }

    #[test]
    fn test_offload_ranking_without_capabilities_fails() {
        let manager = CodecManager::new(CodecLocation::Adsp, vec![]);
        assert!(manager
            .get_broadcast_config(&[BroadcastQuality::High], &AudioContexts::none())
            .is_none());
    }

    #[test]
    fn test_host_uses_context_presets() {
        let manager = CodecManager::new(CodecLocation::Host, vec![]);
        let mut contexts = AudioContexts::none();
        contexts.add(LeAudioContextType::Media);
        let config = manager.get_broadcast_config(&[BroadcastQuality::High], &contexts);
        assert_eq!(config, Some(broadcast_config::lc3_stereo_24_2_2()));
    }

    #[test]
    fn test_codec_config_matcher_selects_from_candidates() {
        let provider = AudioSetConfigurationProvider::load(
            r#"{
                "configurations": [
                    {
                        "name": "DualDev_OneChanStereoSnk_32_2",
                        "subconfigs": [
                            {
                                "direction": "sink", "device_count": 2, "ase_count": 2,
                                "sampling_frequency_hz": 32000, "frame_duration_us": 10000,
                                "octets_per_codec_frame": 80, "audio_channel_allocation": 3,
                                "codec_frames_per_sdu": 1
                            }
                        ]
                    },
                    {
                        "name": "SingleDev_OneChanMonoSnk_16_2",
                        "subconfigs": [
                            {
                                "direction": "sink", "device_count": 1, "ase_count": 1,
                                "sampling_frequency_hz": 16000, "frame_duration_us": 10000,
                                "octets_per_codec_frame": 40, "audio_channel_allocation": 4,
                                "codec_frames_per_sdu": 1
                            }
                        ]
                    }
                ]
            }"#,
            r#"{
                "scenarios": [
                    {
                        "name": "Media",
                        "configurations": [
                            "DualDev_OneChanStereoSnk_32_2",
                            "SingleDev_OneChanMonoSnk_16_2"
                        ]
                    }
                ]
            }"#,
        )
        .unwrap();
        let manager = CodecManager::new(CodecLocation::Host, vec![]);

        // The matcher sees the whole candidate list and picks.
        let selected =
            manager.get_codec_config(&provider, LeAudioContextType::Media, |candidates| {
                candidates?
                    .iter()
                    .copied()
                    .find(|c| c.confs.iter().all(|s| s.sampling_frequency_hz < 32000))
            });
        assert_eq!(selected.unwrap().name, "SingleDev_OneChanMonoSnk_16_2");

        // The matcher may decline every candidate.
        let selected =
            manager.get_codec_config(&provider, LeAudioContextType::Media, |_| None);
        assert!(selected.is_none());
    }

    #[test]
    fn test_codec_config_empty_scenario_gives_matcher_none_once() {
        let provider = AudioSetConfigurationProvider::load(
            r#"{ "configurations": [] }"#,
            r#"{ "scenarios": [ { "name": "Media", "configurations": [] } ] }"#,
        )
        .unwrap();
        let manager = CodecManager::new(CodecLocation::Host, vec![]);

        let mut calls = 0;
        let selected =
            manager.get_codec_config(&provider, LeAudioContextType::Media, |candidates| {
                calls += 1;
                assert!(candidates.is_none());
                None
            });
        assert!(selected.is_none());
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_swb_threshold_asymmetry() {
        let manager = CodecManager::new(CodecLocation::Host, vec![]);
        let single = AudioSetConfiguration {
            name: "single".into(),
            confs: vec![
                swb_setting(ConfigDirection::Sink, 32000),
                swb_setting(ConfigDirection::Source, 32000),
            ],
        };
        // One qualifying setting per direction is bidirectional SWB but not
        // dual bidirectional SWB.
        assert!(manager.check_codec_config_is_bidir_swb(&single));
        assert!(!manager.check_codec_config_is_dual_bidir_swb(&single));

        let dual = AudioSetConfiguration {
            name: "dual".into(),
            confs: vec![
                swb_setting(ConfigDirection::Sink, 32000),
                swb_setting(ConfigDirection::Sink, 32000),
                swb_setting(ConfigDirection::Source, 32000),
                swb_setting(ConfigDirection::Source, 32000),
            ],
        };
        assert!(manager.check_codec_config_is_bidir_swb(&dual));
        assert!(manager.check_codec_config_is_dual_bidir_swb(&dual));

        let narrow = AudioSetConfiguration {
            name: "narrow".into(),
            confs: vec![
                swb_setting(ConfigDirection::Sink, 16000),
                swb_setting(ConfigDirection::Source, 16000),
            ],
        };
        assert!(!manager.check_codec_config_is_bidir_swb(&narrow));
    }

    #[test]
    fn test_cis_configuration_mono_mixing() {
        let mut manager = CodecManager::new(CodecLocation::Adsp, capabilities());
        // Two CISes, only the left one connected yet.
        manager.update_cis_configuration(
            &[0x60, 0x61],
            &[(0x60, audio_location::FRONT_LEFT)],
            StreamDirection::Sink,
        );
        let entries = manager.cis_configuration(StreamDirection::Sink);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].target_allocation, audio_location::FRONT_LEFT);
        assert_eq!(entries[0].current_allocation, audio_location::STEREO);
        assert_eq!(entries[1].target_allocation, audio_location::FRONT_RIGHT);
        assert!(entries[0].is_initial);

        // Both connected: targets and currents agree.
        manager.update_cis_configuration(
            &[0x60, 0x61],
            &[(0x60, audio_location::FRONT_LEFT), (0x61, audio_location::FRONT_RIGHT)],
            StreamDirection::Sink,
        );
        let entries = manager.cis_configuration(StreamDirection::Sink);
        assert_eq!(entries[0].current_allocation, audio_location::FRONT_LEFT);
        assert_eq!(entries[1].current_allocation, audio_location::FRONT_RIGHT);
        assert!(!entries[0].is_initial);

        manager.clear_cis_configuration(StreamDirection::Sink);
        assert!(manager.cis_configuration(StreamDirection::Sink).is_empty());
    }

    #[test]
    fn test_broadcast_conn_handle_mapping() {
        let manager = CodecManager::new(CodecLocation::Adsp, capabilities());

        let stereo = manager
            .update_broadcast_conn_handle(&[0x60, 0x61], &broadcast_config::lc3_stereo_24_2_2())
            .unwrap();
        assert_eq!(
            stereo.stream_map,
            vec![(0x60, audio_location::FRONT_LEFT), (0x61, audio_location::FRONT_RIGHT)]
        );

        let mono = manager
            .update_broadcast_conn_handle(&[0x60], &broadcast_config::lc3_mono_16_2_2())
            .unwrap();
        assert_eq!(mono.stream_map, vec![(0x60, audio_location::FRONT_CENTER)]);

        // Handle count must match the BIS count.
        assert!(manager
            .update_broadcast_conn_handle(&[0x60], &broadcast_config::lc3_stereo_24_2_2())
            .is_none());

        let host = CodecManager::new(CodecLocation::Host, vec![]);
        assert!(host
            .update_broadcast_conn_handle(&[0x60], &broadcast_config::lc3_mono_16_2_2())
            .is_none());
    }
}
