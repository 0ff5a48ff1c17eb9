//! Static audio set configuration provider.
//!
//! Loads the codec configuration and scenario definitions from a JSON pair
//! and serves them by audio context type. Loading is all-or-nothing: a single
//! malformed entry fails the whole load.

use std::collections::HashMap;
use std::fmt;

use log::warn;
use serde_json::Value;

use crate::ltv::LeAudioContextType;

/// The scenario used when a context type has no dedicated scenario.
pub const DEFAULT_SCENARIO: &str = "Media";

#[derive(Debug)]
pub enum ConfigError {
    /// The JSON document does not match the expected schema.
    Malformed(&'static str),
    /// A scenario references a configuration that was not loaded.
    UnknownConfiguration(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Malformed(what) => write!(f, "malformed configuration: {}", what),
            ConfigError::UnknownConfiguration(name) => {
                write!(f, "scenario references unknown configuration {}", name)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigDirection {
    Sink,
    Source,
}

/// LC3 parameters of one direction entry within an audio set configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct CodecConfigSetting {
    pub direction: ConfigDirection,
    pub device_count: u8,
    pub ase_count: u8,
    pub sampling_frequency_hz: u32,
    pub frame_duration_us: u32,
    pub octets_per_codec_frame: u16,
    pub audio_channel_allocation: u32,
    pub codec_frames_per_sdu: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioSetConfiguration {
    pub name: String,
    pub confs: Vec<CodecConfigSetting>,
}

pub struct AudioSetConfigurationProvider {
    configurations: HashMap<String, AudioSetConfiguration>,
    /// Scenario name → ordered configuration names.
    scenarios: HashMap<String, Vec<String>>,
    /// Context type → scenario name.
    context_scenarios: HashMap<LeAudioContextType, String>,
}

impl AudioSetConfigurationProvider {
    /// Parses the configuration and scenario documents. Any failure leaves
    /// no provider behind.
    pub fn load(configurations_json: &str, scenarios_json: &str) -> Result<Self, ConfigError> {
        let configurations = Self::parse_configurations(configurations_json)?;
        let (scenarios, context_scenarios) = Self::parse_scenarios(scenarios_json)?;

        for names in scenarios.values() {
            for name in names {
                if !configurations.contains_key(name) {
                    return Err(ConfigError::UnknownConfiguration(name.clone()));
                }
            }
        }

        Ok(Self { configurations, scenarios, context_scenarios })
    }

    fn parse_configurations(
        json: &str,
    ) -> Result<HashMap<String, AudioSetConfiguration>, ConfigError> {
        let root: Value = serde_json::from_str(json)
            .map_err(|_| ConfigError::Malformed("configurations document"))?;
        let list = root
            .get("configurations")
            .and_then(Value::as_array)
            .ok_or(ConfigError::Malformed("configurations list"))?;

        let mut configurations = HashMap::new();
        for entry in list {
            let name = entry
                .get("name")
                .and_then(Value::as_str)
                .ok_or(ConfigError::Malformed("configuration name"))?
                .to_string();
            let subconfigs = entry
                .get("subconfigs")
                .and_then(Value::as_array)
                .ok_or(ConfigError::Malformed("configuration subconfigs"))?;

            let mut confs = vec![];
            for subconfig in subconfigs {
                confs.push(Self::parse_subconfig(subconfig)?);
            }
            configurations.insert(name.clone(), AudioSetConfiguration { name, confs });
        }
        Ok(configurations)
    }

    fn parse_subconfig(value: &Value) -> Result<CodecConfigSetting, ConfigError> {
        fn get_u64(value: &Value, field: &'static str) -> Result<u64, ConfigError> {
            value.get(field).and_then(Value::as_u64).ok_or(ConfigError::Malformed(field))
        }

        let direction = match value.get("direction").and_then(Value::as_str) {
            Some("sink") => ConfigDirection::Sink,
            Some("source") => ConfigDirection::Source,
            _ => return Err(ConfigError::Malformed("direction")),
        };

        Ok(CodecConfigSetting {
            direction,
            device_count: get_u64(value, "device_count")? as u8,
            ase_count: get_u64(value, "ase_count")? as u8,
            sampling_frequency_hz: get_u64(value, "sampling_frequency_hz")? as u32,
            frame_duration_us: get_u64(value, "frame_duration_us")? as u32,
            octets_per_codec_frame: get_u64(value, "octets_per_codec_frame")? as u16,
            audio_channel_allocation: get_u64(value, "audio_channel_allocation")? as u32,
            codec_frames_per_sdu: get_u64(value, "codec_frames_per_sdu")? as u8,
        })
    }

    fn parse_scenarios(
        json: &str,
    ) -> Result<(HashMap<String, Vec<String>>, HashMap<LeAudioContextType, String>), ConfigError>
    {
        let root: Value =
            serde_json::from_str(json).map_err(|_| ConfigError::Malformed("scenarios document"))?;
        let list = root
            .get("scenarios")
            .and_then(Value::as_array)
            .ok_or(ConfigError::Malformed("scenarios list"))?;

        let mut scenarios = HashMap::new();
        for entry in list {
            let name = entry
                .get("name")
                .and_then(Value::as_str)
                .ok_or(ConfigError::Malformed("scenario name"))?
                .to_string();
            let configurations = entry
                .get("configurations")
                .and_then(Value::as_array)
                .ok_or(ConfigError::Malformed("scenario configurations"))?
                .iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .ok_or(ConfigError::Malformed("scenario configuration name"))?;
            scenarios.insert(name, configurations);
        }

        if !scenarios.contains_key(DEFAULT_SCENARIO) {
            return Err(ConfigError::Malformed("missing default scenario"));
        }

        Ok((scenarios, Self::context_scenarios()))
    }

    /// Context types served by a dedicated scenario; everything else falls
    /// back to the default.
    fn context_scenarios() -> HashMap<LeAudioContextType, String> {
        [
            (LeAudioContextType::Media, "Media"),
            (LeAudioContextType::Alerts, "Media"),
            (LeAudioContextType::Instructional, "Media"),
            (LeAudioContextType::Notifications, "Media"),
            (LeAudioContextType::EmergencyAlarm, "Media"),
            (LeAudioContextType::Unspecified, "Media"),
            (LeAudioContextType::Conversational, "Conversational"),
            (LeAudioContextType::Game, "Game"),
            (LeAudioContextType::Live, "Live"),
        ]
        .into_iter()
        .map(|(context, scenario)| (context, scenario.to_string()))
        .collect()
    }

    /// Returns the configurations of the scenario serving the given context
    /// type, falling back to the default scenario when the scenario is not
    /// defined in the loaded content.
    pub fn get_configurations(&self, context: LeAudioContextType) -> Vec<&AudioSetConfiguration> {
        let scenario = self
            .context_scenarios
            .get(&context)
            .filter(|scenario| self.scenarios.contains_key(*scenario))
            .cloned()
            .unwrap_or_else(|| {
                warn!("no scenario for context {:?}, using {}", context, DEFAULT_SCENARIO);
                DEFAULT_SCENARIO.to_string()
            });

        self.scenarios
            .get(&scenario)
            .into_iter()
            .flatten()
            .filter_map(|name| self.configurations.get(name))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIGURATIONS: &str = r#"{
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
    }"#;

    const SCENARIOS: &str = r#"{
        "scenarios": [
            {
                "name": "Media",
                "configurations": [
                    "DualDev_OneChanStereoSnk_32_2",
                    "SingleDev_OneChanMonoSnk_16_2"
                ]
            }
        ]
    }"#;

    #[test]
    fn test_load_and_lookup() {
        let provider = AudioSetConfigurationProvider::load(CONFIGURATIONS, SCENARIOS).unwrap();
        let configs = provider.get_configurations(LeAudioContextType::Media);
        assert_eq!(configs.len(), 2);
        assert_eq!(configs[0].name, "DualDev_OneChanStereoSnk_32_2");
        assert_eq!(configs[0].confs[0].sampling_frequency_hz, 32000);
    }

    #[test]
    fn test_unknown_context_falls_back_to_default() {
        let provider = AudioSetConfigurationProvider::load(CONFIGURATIONS, SCENARIOS).unwrap();
        // Live has a scenario mapping but the content defines no Live
        // scenario, so the default applies.
        let configs = provider.get_configurations(LeAudioContextType::Live);
        assert_eq!(configs.len(), 2);
        let configs = provider.get_configurations(LeAudioContextType::Ringtone);
        assert_eq!(configs.len(), 2);
    }

    #[test]
    fn test_load_is_all_or_nothing() {
        let malformed = r#"{
            "configurations": [
                { "name": "NoSubconfigs" }
            ]
        }"#;
        assert!(AudioSetConfigurationProvider::load(malformed, SCENARIOS).is_err());

        let dangling = r#"{
            "scenarios": [
                { "name": "Media", "configurations": ["DoesNotExist"] }
            ]
        }"#;
        assert!(AudioSetConfigurationProvider::load(CONFIGURATIONS, dangling).is_err());

        let no_default = r#"{
            "scenarios": [
                { "name": "Game", "configurations": [] }
            ]
        }"#;
        assert!(AudioSetConfigurationProvider::load(CONFIGURATIONS, no_default).is_err());
    }
}
