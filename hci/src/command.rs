// Copyright 2024, The Android Open Source Project
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::reader::{Read, Reader};
use crate::writer::{Write, Writer};

/// HCI Command, as defined in Part E - 5.4.1
#[derive(Debug)]
pub enum Command {
    /// 7.5.4 Read RSSI
    ReadRssi(ReadRssi),
    /// 7.8.103 LE Create BIG
    LeCreateBig(LeCreateBig),
    /// 7.8.105 LE Terminate BIG
    LeTerminateBig(LeTerminateBig),
    /// 7.8.109 LE Setup ISO Data Path
    LeSetupIsoDataPath(LeSetupIsoDataPath),
    /// 7.8.110 LE Remove ISO Data Path
    LeRemoveIsoDataPath(LeRemoveIsoDataPath),
    /// 7.8.118 LE Read Remote Transmit Power Level
    LeReadRemoteTransmitPowerLevel(LeReadRemoteTransmitPowerLevel),
    /// 7.8.121 LE Set Transmit Power Reporting Enable
    LeSetTransmitPowerReportingEnable(LeSetTransmitPowerReportingEnable),
    /// 7.8.130 LE CS Read Local Supported Capabilities
    LeCsReadLocalSupportedCapabilities(LeCsReadLocalSupportedCapabilities),
    /// 7.8.131 LE CS Read Remote Supported Capabilities
    LeCsReadRemoteSupportedCapabilities(LeCsReadRemoteSupportedCapabilities),
    /// 7.8.133 LE CS Security Enable
    LeCsSecurityEnable(LeCsSecurityEnable),
    /// 7.8.134 LE CS Set Default Settings
    LeCsSetDefaultSettings(LeCsSetDefaultSettings),
    /// 7.8.137 LE CS Create Config
    LeCsCreateConfig(LeCsCreateConfig),
    /// 7.8.140 LE CS Set Procedure Parameters
    LeCsSetProcedureParameters(LeCsSetProcedureParameters),
    /// 7.8.141 LE CS Procedure Enable
    LeCsProcedureEnable(LeCsProcedureEnable),
    /// Unknown command
    Unknown(OpCode),
}

impl Command {
    /// Read an HCI Command packet
    pub fn from_bytes(data: &[u8]) -> Result<Self, Option<OpCode>> {
        fn parse_packet(data: &[u8]) -> Option<(OpCode, Reader)> {
            let mut r = Reader::new(data);
            let opcode = r.read()?;
            let len = r.read_u8()? as usize;
            Some((opcode, Reader::new(r.get(len)?)))
        }

        let Some((opcode, mut r)) = parse_packet(data) else {
            return Err(None);
        };
        Self::dispatch_read(opcode, &mut r).ok_or(Some(opcode))
    }

    fn dispatch_read(opcode: OpCode, r: &mut Reader) -> Option<Command> {
        Some(match opcode {
            ReadRssi::OPCODE => Self::ReadRssi(r.read()?),
            LeCreateBig::OPCODE => Self::LeCreateBig(r.read()?),
            LeTerminateBig::OPCODE => Self::LeTerminateBig(r.read()?),
            LeSetupIsoDataPath::OPCODE => Self::LeSetupIsoDataPath(r.read()?),
            LeRemoveIsoDataPath::OPCODE => Self::LeRemoveIsoDataPath(r.read()?),
            LeReadRemoteTransmitPowerLevel::OPCODE => {
                Self::LeReadRemoteTransmitPowerLevel(r.read()?)
            }
            LeSetTransmitPowerReportingEnable::OPCODE => {
                Self::LeSetTransmitPowerReportingEnable(r.read()?)
            }
            LeCsReadLocalSupportedCapabilities::OPCODE => {
                Self::LeCsReadLocalSupportedCapabilities(r.read()?)
            }
            LeCsReadRemoteSupportedCapabilities::OPCODE => {
                Self::LeCsReadRemoteSupportedCapabilities(r.read()?)
            }
            LeCsSecurityEnable::OPCODE => Self::LeCsSecurityEnable(r.read()?),
            LeCsSetDefaultSettings::OPCODE => Self::LeCsSetDefaultSettings(r.read()?),
            LeCsCreateConfig::OPCODE => Self::LeCsCreateConfig(r.read()?),
            LeCsSetProcedureParameters::OPCODE => Self::LeCsSetProcedureParameters(r.read()?),
            LeCsProcedureEnable::OPCODE => Self::LeCsProcedureEnable(r.read()?),
            opcode => Self::Unknown(opcode),
        })
    }

    fn build<T: CommandOpCode + Write>(command: &T) -> Vec<u8> {
        let mut w = Writer::new(Vec::with_capacity(3 + 255));
        w.write(&T::OPCODE);
        w.write_u8(0);
        w.write(command);

        let mut vec = w.into_vec();
        vec[2] = (vec.len() - 3).try_into().unwrap();
        vec
    }
}

/// OpCode of HCI Command, as defined in Part E - 5.4.1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpCode(u16);

impl OpCode {
    /// OpCode from OpCode Group Field (OGF) and OpCode Command Field (OCF).
    pub const fn from(ogf: u16, ocf: u16) -> Self {
        assert!(ogf < 1 << 6 && ocf < 1 << 10);
        Self(ogf << 10 | ocf)
    }
}

impl From<u16> for OpCode {
    fn from(v: u16) -> Self {
        OpCode(v)
    }
}

impl Read for OpCode {
    fn read(r: &mut Reader) -> Option<Self> {
        Some(r.read_u16()?.into())
    }
}

impl Write for OpCode {
    fn write(&self, w: &mut Writer) {
        w.write_u16(self.0)
    }
}

/// Define command OpCode
pub trait CommandOpCode {
    /// OpCode of the command
    const OPCODE: OpCode;
}

/// Build command from definition
pub trait CommandToBytes: CommandOpCode + Write {
    /// Output the HCI Command packet
    fn to_bytes(&self) -> Vec<u8>
    where
        Self: Sized,
    {
        Command::build(self)
    }
}

impl<T: CommandOpCode + Write> CommandToBytes for T {}

pub use defs::*;

#[allow(missing_docs)]
mod defs {

    use super::*;

    // 7.5.4 Read RSSI

    impl CommandOpCode for ReadRssi {
        const OPCODE: OpCode = OpCode::from(0x05, 0x005);
    }

    #[derive(Debug, Clone)]
    pub struct ReadRssi {
        pub connection_handle: u16,
    }

    impl Read for ReadRssi {
        fn read(r: &mut Reader) -> Option<Self> {
            Some(Self { connection_handle: r.read_u16()? })
        }
    }

    impl Write for ReadRssi {
        fn write(&self, w: &mut Writer) {
            w.write_u16(self.connection_handle);
        }
    }

    #[test]
    fn test_read_rssi() {
        let dump = [0x05, 0x14, 0x02, 0x40, 0x00];
        let Ok(Command::ReadRssi(c)) = Command::from_bytes(&dump) else { panic!() };
        assert_eq!(c.connection_handle, 0x40);
        assert_eq!(c.to_bytes(), &dump[..]);
    }

    // 7.8.103 LE Create BIG

    impl CommandOpCode for LeCreateBig {
        const OPCODE: OpCode = OpCode::from(0x08, 0x068);
    }

    #[derive(Debug, Clone)]
    pub struct LeCreateBig {
        pub big_handle: u8,
        pub advertising_handle: u8,
        pub num_bis: u8,
        pub sdu_interval: u32,
        pub max_sdu: u16,
        pub max_transport_latency: u16,
        pub rtn: u8,
        pub phy: u8,
        pub packing: u8,
        pub framing: u8,
        pub encryption: u8,
        pub broadcast_code: [u8; 16],
    }

    impl Read for LeCreateBig {
        fn read(r: &mut Reader) -> Option<Self> {
            Some(Self {
                big_handle: r.read_u8()?,
                advertising_handle: r.read_u8()?,
                num_bis: r.read_u8()?,
                sdu_interval: r.read_u24()?,
                max_sdu: r.read_u16()?,
                max_transport_latency: r.read_u16()?,
                rtn: r.read_u8()?,
                phy: r.read_u8()?,
                packing: r.read_u8()?,
                framing: r.read_u8()?,
                encryption: r.read_u8()?,
                broadcast_code: r.read_bytes()?,
            })
        }
    }

    impl Write for LeCreateBig {
        fn write(&self, w: &mut Writer) {
            w.write_u8(self.big_handle);
            w.write_u8(self.advertising_handle);
            w.write_u8(self.num_bis);
            w.write_u24(self.sdu_interval);
            w.write_u16(self.max_sdu);
            w.write_u16(self.max_transport_latency);
            w.write_u8(self.rtn);
            w.write_u8(self.phy);
            w.write_u8(self.packing);
            w.write_u8(self.framing);
            w.write_u8(self.encryption);
            w.write_bytes(&self.broadcast_code);
        }
    }

    #[test]
    fn test_le_create_big() {
        let dump = [
            0x68, 0x20, 0x1f, 0x01, 0x01, 0x02, 0x10, 0x27, 0x00, 0x78, 0x00, 0x3c, 0x00, 0x04,
            0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        let Ok(Command::LeCreateBig(c)) = Command::from_bytes(&dump) else { panic!() };
        assert_eq!(c.big_handle, 0x01);
        assert_eq!(c.advertising_handle, 0x01);
        assert_eq!(c.num_bis, 2);
        assert_eq!(c.sdu_interval, 10_000);
        assert_eq!(c.max_sdu, 120);
        assert_eq!(c.max_transport_latency, 60);
        assert_eq!(c.rtn, 4);
        assert_eq!(c.phy, 0x02);
        assert_eq!(c.packing, 0);
        assert_eq!(c.framing, 0);
        assert_eq!(c.encryption, 0);
        assert_eq!(c.broadcast_code, [0; 16]);
        assert_eq!(c.to_bytes(), &dump[..]);
    }

    // 7.8.105 LE Terminate BIG

    impl CommandOpCode for LeTerminateBig {
        const OPCODE: OpCode = OpCode::from(0x08, 0x06a);
    }

    #[derive(Debug, Clone)]
    pub struct LeTerminateBig {
        pub big_handle: u8,
        pub reason: u8,
    }

    impl Read for LeTerminateBig {
        fn read(r: &mut Reader) -> Option<Self> {
            Some(Self { big_handle: r.read_u8()?, reason: r.read_u8()? })
        }
    }

    impl Write for LeTerminateBig {
        fn write(&self, w: &mut Writer) {
            w.write_u8(self.big_handle);
            w.write_u8(self.reason);
        }
    }

    #[test]
    fn test_le_terminate_big() {
        let dump = [0x6a, 0x20, 0x02, 0x01, 0x16];
        let Ok(Command::LeTerminateBig(c)) = Command::from_bytes(&dump) else { panic!() };
        assert_eq!(c.big_handle, 0x01);
        assert_eq!(c.reason, 0x16);
        assert_eq!(c.to_bytes(), &dump[..]);
    }

    // 7.8.109 LE Setup ISO Data Path

    impl CommandOpCode for LeSetupIsoDataPath {
        const OPCODE: OpCode = OpCode::from(0x08, 0x06e);
    }

    #[derive(Debug, Clone)]
    pub struct LeSetupIsoDataPath {
        pub connection_handle: u16,
        pub data_path_direction: u8,
        pub data_path_id: u8,
        pub codec_id: [u8; 5],
        pub controller_delay: u32,
        pub codec_configuration: Vec<u8>,
    }

    impl Read for LeSetupIsoDataPath {
        fn read(r: &mut Reader) -> Option<Self> {
            Some(Self {
                connection_handle: r.read_u16()?,
                data_path_direction: r.read_u8()?,
                data_path_id: r.read_u8()?,
                codec_id: r.read_bytes()?,
                controller_delay: r.read_u24()?,
                codec_configuration: r.read()?,
            })
        }
    }

    impl Write for LeSetupIsoDataPath {
        fn write(&self, w: &mut Writer) {
            w.write_u16(self.connection_handle);
            w.write_u8(self.data_path_direction);
            w.write_u8(self.data_path_id);
            w.write_bytes(&self.codec_id);
            w.write_u24(self.controller_delay);
            w.write(&self.codec_configuration);
        }
    }

    #[test]
    fn test_le_setup_iso_data_path() {
        let dump = [
            0x6e, 0x20, 0x0d, 0x01, 0x00, 0x00, 0x00, 0x06, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00,
        ];
        let Ok(Command::LeSetupIsoDataPath(c)) = Command::from_bytes(&dump) else { panic!() };
        assert_eq!(c.connection_handle, 0x01);
        assert_eq!(c.data_path_direction, 0x00);
        assert_eq!(c.data_path_id, 0x00);
        assert_eq!(c.codec_id, [0x06, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(c.controller_delay, 0);
        assert!(c.codec_configuration.is_empty());
        assert_eq!(c.to_bytes(), &dump[..]);
    }

    // 7.8.110 LE Remove ISO Data Path

    impl CommandOpCode for LeRemoveIsoDataPath {
        const OPCODE: OpCode = OpCode::from(0x08, 0x06f);
    }

    #[derive(Debug, Clone)]
    pub struct LeRemoveIsoDataPath {
        pub connection_handle: u16,
        pub data_path_direction: u8,
    }

    impl Read for LeRemoveIsoDataPath {
        fn read(r: &mut Reader) -> Option<Self> {
            Some(Self { connection_handle: r.read_u16()?, data_path_direction: r.read_u8()? })
        }
    }

    impl Write for LeRemoveIsoDataPath {
        fn write(&self, w: &mut Writer) {
            w.write_u16(self.connection_handle);
            w.write_u8(self.data_path_direction);
        }
    }

    #[test]
    fn test_le_remove_iso_data_path() {
        let dump = [0x6f, 0x20, 0x03, 0x01, 0x00, 0x01];
        let Ok(Command::LeRemoveIsoDataPath(c)) = Command::from_bytes(&dump) else { panic!() };
        assert_eq!(c.connection_handle, 0x01);
        assert_eq!(c.data_path_direction, 0x01);
        assert_eq!(c.to_bytes(), &dump[..]);
    }

    // 7.8.118 LE Read Remote Transmit Power Level

    impl CommandOpCode for LeReadRemoteTransmitPowerLevel {
        const OPCODE: OpCode = OpCode::from(0x08, 0x077);
    }

    #[derive(Debug, Clone)]
    pub struct LeReadRemoteTransmitPowerLevel {
        pub connection_handle: u16,
        pub phy: u8,
    }

    impl Read for LeReadRemoteTransmitPowerLevel {
        fn read(r: &mut Reader) -> Option<Self> {
            Some(Self { connection_handle: r.read_u16()?, phy: r.read_u8()? })
        }
    }

    impl Write for LeReadRemoteTransmitPowerLevel {
        fn write(&self, w: &mut Writer) {
            w.write_u16(self.connection_handle);
            w.write_u8(self.phy);
        }
    }

    #[test]
    fn test_le_read_remote_transmit_power_level() {
        let dump = [0x77, 0x20, 0x03, 0x40, 0x00, 0x01];
        let Ok(Command::LeReadRemoteTransmitPowerLevel(c)) = Command::from_bytes(&dump) else {
            panic!()
        };
        assert_eq!(c.connection_handle, 0x40);
        assert_eq!(c.phy, 0x01);
        assert_eq!(c.to_bytes(), &dump[..]);
    }

    // 7.8.121 LE Set Transmit Power Reporting Enable

    impl CommandOpCode for LeSetTransmitPowerReportingEnable {
        const OPCODE: OpCode = OpCode::from(0x08, 0x07a);
    }

    #[derive(Debug, Clone)]
    pub struct LeSetTransmitPowerReportingEnable {
        pub connection_handle: u16,
        pub local_enable: u8,
        pub remote_enable: u8,
    }

    impl Read for LeSetTransmitPowerReportingEnable {
        fn read(r: &mut Reader) -> Option<Self> {
            Some(Self {
                connection_handle: r.read_u16()?,
                local_enable: r.read_u8()?,
                remote_enable: r.read_u8()?,
            })
        }
    }

    impl Write for LeSetTransmitPowerReportingEnable {
        fn write(&self, w: &mut Writer) {
            w.write_u16(self.connection_handle);
            w.write_u8(self.local_enable);
            w.write_u8(self.remote_enable);
        }
    }

    #[test]
    fn test_le_set_transmit_power_reporting_enable() {
        let dump = [0x7a, 0x20, 0x04, 0x40, 0x00, 0x00, 0x01];
        let Ok(Command::LeSetTransmitPowerReportingEnable(c)) = Command::from_bytes(&dump) else {
            panic!()
        };
        assert_eq!(c.connection_handle, 0x40);
        assert_eq!(c.local_enable, 0x00);
        assert_eq!(c.remote_enable, 0x01);
        assert_eq!(c.to_bytes(), &dump[..]);
    }

    // 7.8.130 LE CS Read Local Supported Capabilities

    impl CommandOpCode for LeCsReadLocalSupportedCapabilities {
        const OPCODE: OpCode = OpCode::from(0x08, 0x089);
    }

    #[derive(Debug, Clone)]
    pub struct LeCsReadLocalSupportedCapabilities {}

    impl Read for LeCsReadLocalSupportedCapabilities {
        fn read(_: &mut Reader) -> Option<Self> {
            Some(Self {})
        }
    }

    impl Write for LeCsReadLocalSupportedCapabilities {
        fn write(&self, _: &mut Writer) {}
    }

    #[test]
    fn test_le_cs_read_local_supported_capabilities() {
        let dump = [0x89, 0x20, 0x00];
        let Ok(Command::LeCsReadLocalSupportedCapabilities(c)) = Command::from_bytes(&dump) else {
            panic!()
        };
        assert_eq!(c.to_bytes(), &dump[..]);
    }

    // 7.8.131 LE CS Read Remote Supported Capabilities

    impl CommandOpCode for LeCsReadRemoteSupportedCapabilities {
        const OPCODE: OpCode = OpCode::from(0x08, 0x08a);
    }

    #[derive(Debug, Clone)]
    pub struct LeCsReadRemoteSupportedCapabilities {
        pub connection_handle: u16,
    }

    impl Read for LeCsReadRemoteSupportedCapabilities {
        fn read(r: &mut Reader) -> Option<Self> {
            Some(Self { connection_handle: r.read_u16()? })
        }
    }

    impl Write for LeCsReadRemoteSupportedCapabilities {
        fn write(&self, w: &mut Writer) {
            w.write_u16(self.connection_handle);
        }
    }

    // 7.8.133 LE CS Security Enable

    impl CommandOpCode for LeCsSecurityEnable {
        const OPCODE: OpCode = OpCode::from(0x08, 0x08c);
    }

    #[derive(Debug, Clone)]
    pub struct LeCsSecurityEnable {
        pub connection_handle: u16,
    }

    impl Read for LeCsSecurityEnable {
        fn read(r: &mut Reader) -> Option<Self> {
            Some(Self { connection_handle: r.read_u16()? })
        }
    }

    impl Write for LeCsSecurityEnable {
        fn write(&self, w: &mut Writer) {
            w.write_u16(self.connection_handle);
        }
    }

    // 7.8.134 LE CS Set Default Settings

    impl CommandOpCode for LeCsSetDefaultSettings {
        const OPCODE: OpCode = OpCode::from(0x08, 0x08d);
    }

    #[derive(Debug, Clone)]
    pub struct LeCsSetDefaultSettings {
        pub connection_handle: u16,
        pub role_enable: u8,
        pub cs_sync_antenna_selection: u8,
        pub max_tx_power: u8,
    }

    impl Read for LeCsSetDefaultSettings {
        fn read(r: &mut Reader) -> Option<Self> {
            Some(Self {
                connection_handle: r.read_u16()?,
                role_enable: r.read_u8()?,
                cs_sync_antenna_selection: r.read_u8()?,
                max_tx_power: r.read_u8()?,
            })
        }
    }

    impl Write for LeCsSetDefaultSettings {
        fn write(&self, w: &mut Writer) {
            w.write_u16(self.connection_handle);
            w.write_u8(self.role_enable);
            w.write_u8(self.cs_sync_antenna_selection);
            w.write_u8(self.max_tx_power);
        }
    }

    #[test]
    fn test_le_cs_set_default_settings() {
        let dump = [0x8d, 0x20, 0x05, 0x40, 0x00, 0x03, 0x02, 0x0c];
        let Ok(Command::LeCsSetDefaultSettings(c)) = Command::from_bytes(&dump) else { panic!() };
        assert_eq!(c.connection_handle, 0x40);
        assert_eq!(c.role_enable, 0x03);
        assert_eq!(c.cs_sync_antenna_selection, 0x02);
        assert_eq!(c.max_tx_power, 12);
        assert_eq!(c.to_bytes(), &dump[..]);
    }

    // 7.8.137 LE CS Create Config

    impl CommandOpCode for LeCsCreateConfig {
        const OPCODE: OpCode = OpCode::from(0x08, 0x090);
    }

    #[derive(Debug, Clone)]
    pub struct LeCsCreateConfig {
        pub connection_handle: u16,
        pub config_id: u8,
        pub create_context: u8,
        pub main_mode_type: u8,
        pub sub_mode_type: u8,
        pub min_main_mode_steps: u8,
        pub max_main_mode_steps: u8,
        pub main_mode_repetition: u8,
        pub mode_0_steps: u8,
        pub role: u8,
        pub rtt_type: u8,
        pub cs_sync_phy: u8,
        pub channel_map: [u8; 10],
        pub channel_map_repetition: u8,
        pub channel_selection_type: u8,
        pub ch3c_shape: u8,
        pub ch3c_jump: u8,
        pub reserved: u8,
    }

    impl Read for LeCsCreateConfig {
        fn read(r: &mut Reader) -> Option<Self> {
            Some(Self {
                connection_handle: r.read_u16()?,
                config_id: r.read_u8()?,
                create_context: r.read_u8()?,
                main_mode_type: r.read_u8()?,
                sub_mode_type: r.read_u8()?,
                min_main_mode_steps: r.read_u8()?,
                max_main_mode_steps: r.read_u8()?,
                main_mode_repetition: r.read_u8()?,
                mode_0_steps: r.read_u8()?,
                role: r.read_u8()?,
                rtt_type: r.read_u8()?,
                cs_sync_phy: r.read_u8()?,
                channel_map: r.read_bytes()?,
                channel_map_repetition: r.read_u8()?,
                channel_selection_type: r.read_u8()?,
                ch3c_shape: r.read_u8()?,
                ch3c_jump: r.read_u8()?,
                reserved: r.read_u8()?,
            })
        }
    }

    impl Write for LeCsCreateConfig {
        fn write(&self, w: &mut Writer) {
            w.write_u16(self.connection_handle);
            w.write_u8(self.config_id);
            w.write_u8(self.create_context);
            w.write_u8(self.main_mode_type);
            w.write_u8(self.sub_mode_type);
            w.write_u8(self.min_main_mode_steps);
            w.write_u8(self.max_main_mode_steps);
            w.write_u8(self.main_mode_repetition);
            w.write_u8(self.mode_0_steps);
            w.write_u8(self.role);
            w.write_u8(self.rtt_type);
            w.write_u8(self.cs_sync_phy);
            w.write_bytes(&self.channel_map);
            w.write_u8(self.channel_map_repetition);
            w.write_u8(self.channel_selection_type);
            w.write_u8(self.ch3c_shape);
            w.write_u8(self.ch3c_jump);
            w.write_u8(self.reserved);
        }
    }

    #[test]
    fn test_le_cs_create_config() {
        let dump = [
            0x90, 0x20, 0x1c, 0x40, 0x00, 0x01, 0x02, 0x02, 0x00, 0x02, 0x05, 0x00, 0x03, 0x00,
            0x02, 0x01, 0xfc, 0xff, 0x7f, 0xfc, 0xff, 0xff, 0xff, 0xff, 0xff, 0x1f, 0x01, 0x01,
            0x00, 0x03, 0x00,
        ];
        let Ok(Command::LeCsCreateConfig(c)) = Command::from_bytes(&dump) else { panic!() };
        assert_eq!(c.connection_handle, 0x40);
        assert_eq!(c.config_id, 0x01);
        assert_eq!(c.create_context, 0x02);
        assert_eq!(c.main_mode_type, 0x02);
        assert_eq!(c.sub_mode_type, 0x00);
        assert_eq!(c.min_main_mode_steps, 0x02);
        assert_eq!(c.max_main_mode_steps, 0x05);
        assert_eq!(c.mode_0_steps, 0x03);
        assert_eq!(c.role, 0x00);
        assert_eq!(c.rtt_type, 0x02);
        assert_eq!(c.cs_sync_phy, 0x01);
        assert_eq!(
            c.channel_map,
            [0xfc, 0xff, 0x7f, 0xfc, 0xff, 0xff, 0xff, 0xff, 0xff, 0x1f]
        );
        assert_eq!(c.channel_map_repetition, 0x01);
        assert_eq!(c.channel_selection_type, 0x01);
        assert_eq!(c.ch3c_shape, 0x00);
        assert_eq!(c.ch3c_jump, 0x03);
        assert_eq!(c.to_bytes(), &dump[..]);
    }

    // 7.8.140 LE CS Set Procedure Parameters

    impl CommandOpCode for LeCsSetProcedureParameters {
        const OPCODE: OpCode = OpCode::from(0x08, 0x093);
    }

    #[derive(Debug, Clone)]
    pub struct LeCsSetProcedureParameters {
        pub connection_handle: u16,
        pub config_id: u8,
        pub max_procedure_len: u16,
        pub min_procedure_interval: u16,
        pub max_procedure_interval: u16,
        pub max_procedure_count: u16,
        pub min_subevent_len: u32,
        pub max_subevent_len: u32,
        pub tone_antenna_config_selection: u8,
        pub phy: u8,
        pub tx_power_delta: u8,
        pub preferred_peer_antenna: u8,
        pub snr_control_initiator: u8,
        pub snr_control_reflector: u8,
    }

    impl Read for LeCsSetProcedureParameters {
        fn read(r: &mut Reader) -> Option<Self> {
            Some(Self {
                connection_handle: r.read_u16()?,
                config_id: r.read_u8()?,
                max_procedure_len: r.read_u16()?,
                min_procedure_interval: r.read_u16()?,
                max_procedure_interval: r.read_u16()?,
                max_procedure_count: r.read_u16()?,
                min_subevent_len: r.read_u24()?,
                max_subevent_len: r.read_u24()?,
                tone_antenna_config_selection: r.read_u8()?,
                phy: r.read_u8()?,
                tx_power_delta: r.read_u8()?,
                preferred_peer_antenna: r.read_u8()?,
                snr_control_initiator: r.read_u8()?,
                snr_control_reflector: r.read_u8()?,
            })
        }
    }

    impl Write for LeCsSetProcedureParameters {
        fn write(&self, w: &mut Writer) {
            w.write_u16(self.connection_handle);
            w.write_u8(self.config_id);
            w.write_u16(self.max_procedure_len);
            w.write_u16(self.min_procedure_interval);
            w.write_u16(self.max_procedure_interval);
            w.write_u16(self.max_procedure_count);
            w.write_u24(self.min_subevent_len);
            w.write_u24(self.max_subevent_len);
            w.write_u8(self.tone_antenna_config_selection);
            w.write_u8(self.phy);
            w.write_u8(self.tx_power_delta);
            w.write_u8(self.preferred_peer_antenna);
            w.write_u8(self.snr_control_initiator);
            w.write_u8(self.snr_control_reflector);
        }
    }

    #[test]
    fn test_le_cs_set_procedure_parameters() {
        let dump = [
            0x93, 0x20, 0x17, 0x40, 0x00, 0x01, 0xff, 0xff, 0x01, 0x00, 0xff, 0x00, 0x01, 0x00,
            0xe2, 0x04, 0x00, 0x00, 0x09, 0x3d, 0x07, 0x01, 0x00, 0x01, 0x00, 0x00,
        ];
        let Ok(Command::LeCsSetProcedureParameters(c)) = Command::from_bytes(&dump) else {
            panic!()
        };
        assert_eq!(c.connection_handle, 0x40);
        assert_eq!(c.config_id, 0x01);
        assert_eq!(c.max_procedure_len, 0xffff);
        assert_eq!(c.min_procedure_interval, 0x01);
        assert_eq!(c.max_procedure_interval, 0xff);
        assert_eq!(c.max_procedure_count, 0x01);
        assert_eq!(c.min_subevent_len, 0x0004e2);
        assert_eq!(c.max_subevent_len, 0x3d0900);
        assert_eq!(c.tone_antenna_config_selection, 0x07);
        assert_eq!(c.phy, 0x01);
        assert_eq!(c.tx_power_delta, 0x00);
        assert_eq!(c.preferred_peer_antenna, 0x01);
        assert_eq!(c.to_bytes(), &dump[..]);
    }

    // 7.8.141 LE CS Procedure Enable

    impl CommandOpCode for LeCsProcedureEnable {
        const OPCODE: OpCode = OpCode::from(0x08, 0x094);
    }

    #[derive(Debug, Clone)]
    pub struct LeCsProcedureEnable {
        pub connection_handle: u16,
        pub config_id: u8,
        pub enable: u8,
    }

    impl Read for LeCsProcedureEnable {
        fn read(r: &mut Reader) -> Option<Self> {
            Some(Self {
                connection_handle: r.read_u16()?,
                config_id: r.read_u8()?,
                enable: r.read_u8()?,
            })
        }
    }

    impl Write for LeCsProcedureEnable {
        fn write(&self, w: &mut Writer) {
            w.write_u16(self.connection_handle);
            w.write_u8(self.config_id);
            w.write_u8(self.enable);
        }
    }

    #[test]
    fn test_le_cs_procedure_enable() {
        let dump = [0x94, 0x20, 0x04, 0x40, 0x00, 0x01, 0x01];
        let Ok(Command::LeCsProcedureEnable(c)) = Command::from_bytes(&dump) else { panic!() };
        assert_eq!(c.connection_handle, 0x40);
        assert_eq!(c.config_id, 0x01);
        assert_eq!(c.enable, 0x01);
        assert_eq!(c.to_bytes(), &dump[..]);
    }
}
