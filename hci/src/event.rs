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

use crate::command::{CommandOpCode, OpCode};
use crate::reader::{Read, Reader};
use crate::status::Status;
use crate::writer::{Write, Writer};

/// HCI Event, as defined in Part E - 5.4.4
#[derive(Debug)]
pub enum Event {
    /// 7.7.14 Command Complete
    CommandComplete(CommandComplete),
    /// 7.7.15 Command Status
    CommandStatus(CommandStatus),
    /// 7.7.65.27 LE Create BIG Complete
    LeCreateBigComplete(LeCreateBigComplete),
    /// 7.7.65.28 LE Terminate BIG Complete
    LeTerminateBigComplete(LeTerminateBigComplete),
    /// 7.7.65.33 LE Transmit Power Reporting
    LeTransmitPowerReporting(LeTransmitPowerReporting),
    /// 7.7.65.39 LE CS Read Remote Supported Capabilities Complete
    LeCsReadRemoteSupportedCapabilitiesComplete(LeCsReadRemoteSupportedCapabilitiesComplete),
    /// 7.7.65.41 LE CS Security Enable Complete
    LeCsSecurityEnableComplete(LeCsSecurityEnableComplete),
    /// 7.7.65.42 LE CS Config Complete
    LeCsConfigComplete(LeCsConfigComplete),
    /// 7.7.65.44 LE CS Procedure Enable Complete
    LeCsProcedureEnableComplete(LeCsProcedureEnableComplete),
    /// 7.7.65.45 LE CS Subevent Result
    LeCsSubeventResult(LeCsSubeventResult),
    /// 7.7.65.46 LE CS Subevent Result Continue
    LeCsSubeventResultContinue(LeCsSubeventResultContinue),
    /// Unknown event
    Unknown(Code),
}

impl Event {
    /// Read an HCI Event packet
    pub fn from_bytes(data: &[u8]) -> Result<Self, Option<Code>> {
        fn parse_packet(data: &[u8]) -> Option<(Code, Reader)> {
            let mut r = Reader::new(data);
            let code = r.read_u8()?;
            let len = r.read_u8()? as usize;
            let mut r = Reader::new(r.get(len)?);
            let code = match code {
                LE_META => Code(code, Some(r.read_u8()?)),
                _ => Code(code, None),
            };
            Some((code, r))
        }

        let Some((code, mut r)) = parse_packet(data) else {
            return Err(None);
        };
        Self::dispatch_read(code, &mut r).ok_or(Some(code))
    }

    fn dispatch_read(code: Code, r: &mut Reader) -> Option<Event> {
        Some(match code {
            CommandComplete::CODE => Self::CommandComplete(r.read()?),
            CommandStatus::CODE => Self::CommandStatus(r.read()?),
            LeCreateBigComplete::CODE => Self::LeCreateBigComplete(r.read()?),
            LeTerminateBigComplete::CODE => Self::LeTerminateBigComplete(r.read()?),
            LeTransmitPowerReporting::CODE => Self::LeTransmitPowerReporting(r.read()?),
            LeCsReadRemoteSupportedCapabilitiesComplete::CODE => {
                Self::LeCsReadRemoteSupportedCapabilitiesComplete(r.read()?)
            }
            LeCsSecurityEnableComplete::CODE => Self::LeCsSecurityEnableComplete(r.read()?),
            LeCsConfigComplete::CODE => Self::LeCsConfigComplete(r.read()?),
            LeCsProcedureEnableComplete::CODE => Self::LeCsProcedureEnableComplete(r.read()?),
            LeCsSubeventResult::CODE => Self::LeCsSubeventResult(r.read()?),
            LeCsSubeventResultContinue::CODE => Self::LeCsSubeventResultContinue(r.read()?),
            code => Self::Unknown(code),
        })
    }

    fn build<T: EventCode + Write>(event: &T) -> Vec<u8> {
        let Code(code, subevent_code) = T::CODE;

        let mut w = Writer::new(Vec::with_capacity(2 + 255));
        w.write_u8(code);
        w.write_u8(0);
        if let Some(subevent_code) = subevent_code {
            w.write_u8(subevent_code);
        }
        w.write(event);

        let mut vec = w.into_vec();
        vec[1] = (vec.len() - 2).try_into().unwrap();
        vec
    }
}

const LE_META: u8 = 0x3e;

/// Event code, with LE subevent code for LE Meta events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Code(u8, Option<u8>);

/// Define event Code
pub trait EventCode {
    /// Code of the event
    const CODE: Code;
}

/// Build event from definition
pub trait EventToBytes: EventCode + Write {
    /// Output the HCI Event packet
    fn to_bytes(&self) -> Vec<u8>
    where
        Self: Sized,
    {
        Event::build(self)
    }
}

impl<T: EventCode + Write> EventToBytes for T {}

pub use defs::*;

#[allow(missing_docs)]
mod defs {

    use super::*;
    use crate::command;

    // 7.7.14 Command Complete

    impl EventCode for CommandComplete {
        const CODE: Code = Code(0x0e, None);
    }

    #[derive(Debug, Clone)]
    pub struct CommandComplete {
        pub num_hci_command_packets: u8,
        pub return_parameters: ReturnParameters,
    }

    impl Read for CommandComplete {
        fn read(r: &mut Reader) -> Option<Self> {
            Some(Self { num_hci_command_packets: r.read_u8()?, return_parameters: r.read()? })
        }
    }

    impl Write for CommandComplete {
        fn write(&self, w: &mut Writer) {
            w.write_u8(self.num_hci_command_packets);
            w.write(&self.return_parameters);
        }
    }

    /// Return parameters of Command Complete, keyed by the command OpCode
    #[derive(Debug, Clone)]
    pub enum ReturnParameters {
        ReadRssi(ReadRssiComplete),
        LeSetupIsoDataPath(IsoDataPathComplete),
        LeRemoveIsoDataPath(IsoDataPathComplete),
        LeSetTransmitPowerReportingEnable(TransmitPowerReportingEnableComplete),
        LeCsReadLocalSupportedCapabilities(LeCsReadLocalSupportedCapabilitiesComplete),
        LeCsSetDefaultSettings(LeCsSetDefaultSettingsComplete),
        LeCsSetProcedureParameters(LeCsSetProcedureParametersComplete),
        Unknown(OpCode),
    }

    impl Read for ReturnParameters {
        fn read(r: &mut Reader) -> Option<Self> {
            let opcode: OpCode = r.read()?;
            Some(match opcode {
                command::ReadRssi::OPCODE => Self::ReadRssi(r.read()?),
                command::LeSetupIsoDataPath::OPCODE => Self::LeSetupIsoDataPath(r.read()?),
                command::LeRemoveIsoDataPath::OPCODE => Self::LeRemoveIsoDataPath(r.read()?),
                command::LeSetTransmitPowerReportingEnable::OPCODE => {
                    Self::LeSetTransmitPowerReportingEnable(r.read()?)
                }
                command::LeCsReadLocalSupportedCapabilities::OPCODE => {
                    Self::LeCsReadLocalSupportedCapabilities(r.read()?)
                }
                command::LeCsSetDefaultSettings::OPCODE => {
                    Self::LeCsSetDefaultSettings(r.read()?)
                }
                command::LeCsSetProcedureParameters::OPCODE => {
                    Self::LeCsSetProcedureParameters(r.read()?)
                }
                opcode => Self::Unknown(opcode),
            })
        }
    }

    impl Write for ReturnParameters {
        fn write(&self, w: &mut Writer) {
            match self {
                Self::ReadRssi(p) => {
                    w.write(&command::ReadRssi::OPCODE);
                    w.write(p);
                }
                Self::LeSetupIsoDataPath(p) => {
                    w.write(&command::LeSetupIsoDataPath::OPCODE);
                    w.write(p);
                }
                Self::LeRemoveIsoDataPath(p) => {
                    w.write(&command::LeRemoveIsoDataPath::OPCODE);
                    w.write(p);
                }
                Self::LeSetTransmitPowerReportingEnable(p) => {
                    w.write(&command::LeSetTransmitPowerReportingEnable::OPCODE);
                    w.write(p);
                }
                Self::LeCsReadLocalSupportedCapabilities(p) => {
                    w.write(&command::LeCsReadLocalSupportedCapabilities::OPCODE);
                    w.write(p);
                }
                Self::LeCsSetDefaultSettings(p) => {
                    w.write(&command::LeCsSetDefaultSettings::OPCODE);
                    w.write(p);
                }
                Self::LeCsSetProcedureParameters(p) => {
                    w.write(&command::LeCsSetProcedureParameters::OPCODE);
                    w.write(p);
                }
                Self::Unknown(opcode) => w.write(opcode),
            }
        }
    }

    #[derive(Debug, Clone)]
    pub struct ReadRssiComplete {
        pub status: Status,
        pub connection_handle: u16,
        pub rssi: i8,
    }

    impl Read for ReadRssiComplete {
        fn read(r: &mut Reader) -> Option<Self> {
            Some(Self {
                status: r.read()?,
                connection_handle: r.read_u16()?,
                rssi: r.read_i8()?,
            })
        }
    }

    impl Write for ReadRssiComplete {
        fn write(&self, w: &mut Writer) {
            w.write(&self.status);
            w.write_u16(self.connection_handle);
            w.write_i8(self.rssi);
        }
    }

    #[derive(Debug, Clone)]
    pub struct IsoDataPathComplete {
        pub status: Status,
        pub connection_handle: u16,
    }

    impl Read for IsoDataPathComplete {
        fn read(r: &mut Reader) -> Option<Self> {
            Some(Self { status: r.read()?, connection_handle: r.read_u16()? })
        }
    }

    impl Write for IsoDataPathComplete {
        fn write(&self, w: &mut Writer) {
            w.write(&self.status);
            w.write_u16(self.connection_handle);
        }
    }

    #[derive(Debug, Clone)]
    pub struct TransmitPowerReportingEnableComplete {
        pub status: Status,
        pub connection_handle: u16,
    }

    impl Read for TransmitPowerReportingEnableComplete {
        fn read(r: &mut Reader) -> Option<Self> {
            Some(Self { status: r.read()?, connection_handle: r.read_u16()? })
        }
    }

    impl Write for TransmitPowerReportingEnableComplete {
        fn write(&self, w: &mut Writer) {
            w.write(&self.status);
            w.write_u16(self.connection_handle);
        }
    }

    #[derive(Debug, Clone)]
    pub struct LeCsReadLocalSupportedCapabilitiesComplete {
        pub status: Status,
        pub num_config_supported: u8,
        pub max_consecutive_procedures_supported: u16,
        pub num_antennas_supported: u8,
        pub max_antenna_paths_supported: u8,
        pub roles_supported: u8,
    }

    impl Read for LeCsReadLocalSupportedCapabilitiesComplete {
        fn read(r: &mut Reader) -> Option<Self> {
            Some(Self {
                status: r.read()?,
                num_config_supported: r.read_u8()?,
                max_consecutive_procedures_supported: r.read_u16()?,
                num_antennas_supported: r.read_u8()?,
                max_antenna_paths_supported: r.read_u8()?,
                roles_supported: r.read_u8()?,
            })
        }
    }

    impl Write for LeCsReadLocalSupportedCapabilitiesComplete {
        fn write(&self, w: &mut Writer) {
            w.write(&self.status);
            w.write_u8(self.num_config_supported);
            w.write_u16(self.max_consecutive_procedures_supported);
            w.write_u8(self.num_antennas_supported);
            w.write_u8(self.max_antenna_paths_supported);
            w.write_u8(self.roles_supported);
        }
    }

    #[derive(Debug, Clone)]
    pub struct LeCsSetDefaultSettingsComplete {
        pub status: Status,
        pub connection_handle: u16,
    }

    impl Read for LeCsSetDefaultSettingsComplete {
        fn read(r: &mut Reader) -> Option<Self> {
            Some(Self { status: r.read()?, connection_handle: r.read_u16()? })
        }
    }

    impl Write for LeCsSetDefaultSettingsComplete {
        fn write(&self, w: &mut Writer) {
            w.write(&self.status);
            w.write_u16(self.connection_handle);
        }
    }

    #[derive(Debug, Clone)]
    pub struct LeCsSetProcedureParametersComplete {
        pub status: Status,
        pub connection_handle: u16,
    }

    impl Read for LeCsSetProcedureParametersComplete {
        fn read(r: &mut Reader) -> Option<Self> {
            Some(Self { status: r.read()?, connection_handle: r.read_u16()? })
        }
    }

    impl Write for LeCsSetProcedureParametersComplete {
        fn write(&self, w: &mut Writer) {
            w.write(&self.status);
            w.write_u16(self.connection_handle);
        }
    }

    #[test]
    fn test_command_complete_read_rssi() {
        let dump = [0x0e, 0x07, 0x01, 0x05, 0x14, 0x00, 0x40, 0x00, 0xd3];
        let Ok(Event::CommandComplete(e)) = Event::from_bytes(&dump) else { panic!() };
        assert_eq!(e.num_hci_command_packets, 1);
        let ReturnParameters::ReadRssi(ref p) = e.return_parameters else { panic!() };
        assert!(p.status.is_success());
        assert_eq!(p.connection_handle, 0x40);
        assert_eq!(p.rssi, -45);
        assert_eq!(e.to_bytes(), &dump[..]);
    }

    // 7.7.15 Command Status

    impl EventCode for CommandStatus {
        const CODE: Code = Code(0x0f, None);
    }

    #[derive(Debug, Clone)]
    pub struct CommandStatus {
        pub status: Status,
        pub num_hci_command_packets: u8,
        pub opcode: OpCode,
    }

    impl Read for CommandStatus {
        fn read(r: &mut Reader) -> Option<Self> {
            Some(Self {
                status: r.read()?,
                num_hci_command_packets: r.read_u8()?,
                opcode: r.read()?,
            })
        }
    }

    impl Write for CommandStatus {
        fn write(&self, w: &mut Writer) {
            w.write(&self.status);
            w.write_u8(self.num_hci_command_packets);
            w.write(&self.opcode);
        }
    }

    #[test]
    fn test_command_status() {
        let dump = [0x0f, 0x04, 0x00, 0x01, 0x77, 0x20];
        let Ok(Event::CommandStatus(e)) = Event::from_bytes(&dump) else { panic!() };
        assert!(e.status.is_success());
        assert_eq!(e.num_hci_command_packets, 1);
        assert_eq!(e.opcode, command::LeReadRemoteTransmitPowerLevel::OPCODE);
        assert_eq!(e.to_bytes(), &dump[..]);
    }

    // 7.7.65.27 LE Create BIG Complete

    impl EventCode for LeCreateBigComplete {
        const CODE: Code = Code(LE_META, Some(0x1b));
    }

    #[derive(Debug, Clone)]
    pub struct LeCreateBigComplete {
        pub status: Status,
        pub big_handle: u8,
        pub big_sync_delay: u32,
        pub transport_latency_big: u32,
        pub phy: u8,
        pub nse: u8,
        pub bn: u8,
        pub pto: u8,
        pub irc: u8,
        pub max_pdu: u16,
        pub iso_interval: u16,
        pub connection_handles: Vec<u16>,
    }

    impl Read for LeCreateBigComplete {
        fn read(r: &mut Reader) -> Option<Self> {
            Some(Self {
                status: r.read()?,
                big_handle: r.read_u8()?,
                big_sync_delay: r.read_u24()?,
                transport_latency_big: r.read_u24()?,
                phy: r.read_u8()?,
                nse: r.read_u8()?,
                bn: r.read_u8()?,
                pto: r.read_u8()?,
                irc: r.read_u8()?,
                max_pdu: r.read_u16()?,
                iso_interval: r.read_u16()?,
                connection_handles: r.read()?,
            })
        }
    }

    impl Write for LeCreateBigComplete {
        fn write(&self, w: &mut Writer) {
            w.write(&self.status);
            w.write_u8(self.big_handle);
            w.write_u24(self.big_sync_delay);
            w.write_u24(self.transport_latency_big);
            w.write_u8(self.phy);
            w.write_u8(self.nse);
            w.write_u8(self.bn);
            w.write_u8(self.pto);
            w.write_u8(self.irc);
            w.write_u16(self.max_pdu);
            w.write_u16(self.iso_interval);
            w.write(&self.connection_handles);
        }
    }

    #[test]
    fn test_le_create_big_complete() {
        let dump = [
            0x3e, 0x17, 0x1b, 0x00, 0x01, 0xc8, 0x00, 0x00, 0x64, 0x00, 0x00, 0x02, 0x03, 0x01,
            0x00, 0x03, 0x6b, 0x00, 0x08, 0x00, 0x02, 0x60, 0x00, 0x61, 0x00,
        ];
        let Ok(Event::LeCreateBigComplete(e)) = Event::from_bytes(&dump) else { panic!() };
        assert!(e.status.is_success());
        assert_eq!(e.big_handle, 0x01);
        assert_eq!(e.big_sync_delay, 200);
        assert_eq!(e.transport_latency_big, 100);
        assert_eq!(e.phy, 0x02);
        assert_eq!(e.max_pdu, 107);
        assert_eq!(e.iso_interval, 8);
        assert_eq!(e.connection_handles, vec![0x60, 0x61]);
        assert_eq!(e.to_bytes(), &dump[..]);
    }

    // 7.7.65.28 LE Terminate BIG Complete

    impl EventCode for LeTerminateBigComplete {
        const CODE: Code = Code(LE_META, Some(0x1c));
    }

    #[derive(Debug, Clone)]
    pub struct LeTerminateBigComplete {
        pub big_handle: u8,
        pub reason: u8,
    }

    impl Read for LeTerminateBigComplete {
        fn read(r: &mut Reader) -> Option<Self> {
            Some(Self { big_handle: r.read_u8()?, reason: r.read_u8()? })
        }
    }

    impl Write for LeTerminateBigComplete {
        fn write(&self, w: &mut Writer) {
            w.write_u8(self.big_handle);
            w.write_u8(self.reason);
        }
    }

    #[test]
    fn test_le_terminate_big_complete() {
        let dump = [0x3e, 0x03, 0x1c, 0x01, 0x16];
        let Ok(Event::LeTerminateBigComplete(e)) = Event::from_bytes(&dump) else { panic!() };
        assert_eq!(e.big_handle, 0x01);
        assert_eq!(e.reason, 0x16);
        assert_eq!(e.to_bytes(), &dump[..]);
    }

    // 7.7.65.33 LE Transmit Power Reporting

    impl EventCode for LeTransmitPowerReporting {
        const CODE: Code = Code(LE_META, Some(0x21));
    }

    #[derive(Debug, Clone)]
    pub struct LeTransmitPowerReporting {
        pub status: Status,
        pub connection_handle: u16,
        pub reason: u8,
        pub phy: u8,
        pub transmit_power_level: i8,
        pub transmit_power_level_flag: u8,
        pub delta: i8,
    }

    impl Read for LeTransmitPowerReporting {
        fn read(r: &mut Reader) -> Option<Self> {
            Some(Self {
                status: r.read()?,
                connection_handle: r.read_u16()?,
                reason: r.read_u8()?,
                phy: r.read_u8()?,
                transmit_power_level: r.read_i8()?,
                transmit_power_level_flag: r.read_u8()?,
                delta: r.read_i8()?,
            })
        }
    }

    impl Write for LeTransmitPowerReporting {
        fn write(&self, w: &mut Writer) {
            w.write(&self.status);
            w.write_u16(self.connection_handle);
            w.write_u8(self.reason);
            w.write_u8(self.phy);
            w.write_i8(self.transmit_power_level);
            w.write_u8(self.transmit_power_level_flag);
            w.write_i8(self.delta);
        }
    }

    #[test]
    fn test_le_transmit_power_reporting() {
        let dump = [0x3e, 0x09, 0x21, 0x00, 0x40, 0x00, 0x01, 0x01, 0xec, 0x00, 0x00];
        let Ok(Event::LeTransmitPowerReporting(e)) = Event::from_bytes(&dump) else { panic!() };
        assert!(e.status.is_success());
        assert_eq!(e.connection_handle, 0x40);
        assert_eq!(e.reason, 0x01);
        assert_eq!(e.phy, 0x01);
        assert_eq!(e.transmit_power_level, -20);
        assert_eq!(e.to_bytes(), &dump[..]);
    }

    // 7.7.65.39 LE CS Read Remote Supported Capabilities Complete

    impl EventCode for LeCsReadRemoteSupportedCapabilitiesComplete {
        const CODE: Code = Code(LE_META, Some(0x2c));
    }

    #[derive(Debug, Clone)]
    pub struct LeCsReadRemoteSupportedCapabilitiesComplete {
        pub status: Status,
        pub connection_handle: u16,
        pub num_config_supported: u8,
        pub max_consecutive_procedures_supported: u16,
        pub num_antennas_supported: u8,
        pub max_antenna_paths_supported: u8,
        pub roles_supported: u8,
    }

    impl Read for LeCsReadRemoteSupportedCapabilitiesComplete {
        fn read(r: &mut Reader) -> Option<Self> {
            Some(Self {
                status: r.read()?,
                connection_handle: r.read_u16()?,
                num_config_supported: r.read_u8()?,
                max_consecutive_procedures_supported: r.read_u16()?,
                num_antennas_supported: r.read_u8()?,
                max_antenna_paths_supported: r.read_u8()?,
                roles_supported: r.read_u8()?,
            })
        }
    }

    impl Write for LeCsReadRemoteSupportedCapabilitiesComplete {
        fn write(&self, w: &mut Writer) {
            w.write(&self.status);
            w.write_u16(self.connection_handle);
            w.write_u8(self.num_config_supported);
            w.write_u16(self.max_consecutive_procedures_supported);
            w.write_u8(self.num_antennas_supported);
            w.write_u8(self.max_antenna_paths_supported);
            w.write_u8(self.roles_supported);
        }
    }

    // 7.7.65.41 LE CS Security Enable Complete

    impl EventCode for LeCsSecurityEnableComplete {
        const CODE: Code = Code(LE_META, Some(0x2e));
    }

    #[derive(Debug, Clone)]
    pub struct LeCsSecurityEnableComplete {
        pub status: Status,
        pub connection_handle: u16,
    }

    impl Read for LeCsSecurityEnableComplete {
        fn read(r: &mut Reader) -> Option<Self> {
            Some(Self { status: r.read()?, connection_handle: r.read_u16()? })
        }
    }

    impl Write for LeCsSecurityEnableComplete {
        fn write(&self, w: &mut Writer) {
            w.write(&self.status);
            w.write_u16(self.connection_handle);
        }
    }

    #[test]
    fn test_le_cs_security_enable_complete() {
        let dump = [0x3e, 0x04, 0x2e, 0x00, 0x40, 0x00];
        let Ok(Event::LeCsSecurityEnableComplete(e)) = Event::from_bytes(&dump) else { panic!() };
        assert!(e.status.is_success());
        assert_eq!(e.connection_handle, 0x40);
        assert_eq!(e.to_bytes(), &dump[..]);
    }

    // 7.7.65.42 LE CS Config Complete

    impl EventCode for LeCsConfigComplete {
        const CODE: Code = Code(LE_META, Some(0x2f));
    }

    #[derive(Debug, Clone)]
    pub struct LeCsConfigComplete {
        pub status: Status,
        pub connection_handle: u16,
        pub config_id: u8,
        pub action: u8,
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
        pub t_ip1_time: u8,
        pub t_ip2_time: u8,
        pub t_fcs_time: u8,
        pub t_pm_time: u8,
    }

    impl Read for LeCsConfigComplete {
        fn read(r: &mut Reader) -> Option<Self> {
            Some(Self {
                status: r.read()?,
                connection_handle: r.read_u16()?,
                config_id: r.read_u8()?,
                action: r.read_u8()?,
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
                t_ip1_time: r.read_u8()?,
                t_ip2_time: r.read_u8()?,
                t_fcs_time: r.read_u8()?,
                t_pm_time: r.read_u8()?,
            })
        }
    }

    impl Write for LeCsConfigComplete {
        fn write(&self, w: &mut Writer) {
            w.write(&self.status);
            w.write_u16(self.connection_handle);
            w.write_u8(self.config_id);
            w.write_u8(self.action);
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
            w.write_u8(self.t_ip1_time);
            w.write_u8(self.t_ip2_time);
            w.write_u8(self.t_fcs_time);
            w.write_u8(self.t_pm_time);
        }
    }

    #[test]
    fn test_le_cs_config_complete() {
        let dump = [
            0x3e, 0x22, 0x2f, 0x00, 0x40, 0x00, 0x01, 0x01, 0x02, 0x00, 0x02, 0x05, 0x00, 0x03,
            0x00, 0x02, 0x01, 0xfc, 0xff, 0x7f, 0xfc, 0xff, 0xff, 0xff, 0xff, 0xff, 0x1f, 0x01,
            0x01, 0x00, 0x03, 0x00, 0x91, 0x91, 0x96, 0x28,
        ];
        let Ok(Event::LeCsConfigComplete(e)) = Event::from_bytes(&dump) else { panic!() };
        assert!(e.status.is_success());
        assert_eq!(e.connection_handle, 0x40);
        assert_eq!(e.config_id, 0x01);
        assert_eq!(e.action, 0x01);
        assert_eq!(e.main_mode_type, 0x02);
        assert_eq!(e.sub_mode_type, 0x00);
        assert_eq!(e.role, 0x00);
        assert_eq!(e.to_bytes(), &dump[..]);
    }

    // 7.7.65.44 LE CS Procedure Enable Complete

    impl EventCode for LeCsProcedureEnableComplete {
        const CODE: Code = Code(LE_META, Some(0x30));
    }

    #[derive(Debug, Clone)]
    pub struct LeCsProcedureEnableComplete {
        pub status: Status,
        pub connection_handle: u16,
        pub config_id: u8,
        pub state: u8,
        pub tone_antenna_config_selection: u8,
        pub selected_tx_power: i8,
        pub subevent_len: u32,
        pub subevents_per_event: u8,
        pub subevent_interval: u16,
        pub event_interval: u16,
        pub procedure_interval: u16,
        pub procedure_count: u16,
    }

    impl Read for LeCsProcedureEnableComplete {
        fn read(r: &mut Reader) -> Option<Self> {
            Some(Self {
                status: r.read()?,
                connection_handle: r.read_u16()?,
                config_id: r.read_u8()?,
                state: r.read_u8()?,
                tone_antenna_config_selection: r.read_u8()?,
                selected_tx_power: r.read_i8()?,
                subevent_len: r.read_u24()?,
                subevents_per_event: r.read_u8()?,
                subevent_interval: r.read_u16()?,
                event_interval: r.read_u16()?,
                procedure_interval: r.read_u16()?,
                procedure_count: r.read_u16()?,
            })
        }
    }

    impl Write for LeCsProcedureEnableComplete {
        fn write(&self, w: &mut Writer) {
            w.write(&self.status);
            w.write_u16(self.connection_handle);
            w.write_u8(self.config_id);
            w.write_u8(self.state);
            w.write_u8(self.tone_antenna_config_selection);
            w.write_i8(self.selected_tx_power);
            w.write_u24(self.subevent_len);
            w.write_u8(self.subevents_per_event);
            w.write_u16(self.subevent_interval);
            w.write_u16(self.event_interval);
            w.write_u16(self.procedure_interval);
            w.write_u16(self.procedure_count);
        }
    }

    #[test]
    fn test_le_cs_procedure_enable_complete() {
        let dump = [
            0x3e, 0x14, 0x30, 0x00, 0x40, 0x00, 0x01, 0x01, 0x07, 0x0c, 0xe2, 0x04, 0x00, 0x01,
            0x00, 0x00, 0x00, 0x00, 0x80, 0x00, 0x01, 0x00,
        ];
        let Ok(Event::LeCsProcedureEnableComplete(e)) = Event::from_bytes(&dump) else { panic!() };
        assert!(e.status.is_success());
        assert_eq!(e.connection_handle, 0x40);
        assert_eq!(e.config_id, 0x01);
        assert_eq!(e.state, 0x01);
        assert_eq!(e.tone_antenna_config_selection, 0x07);
        assert_eq!(e.selected_tx_power, 12);
        assert_eq!(e.subevent_len, 0x04e2);
        assert_eq!(e.procedure_interval, 0x80);
        assert_eq!(e.procedure_count, 1);
        assert_eq!(e.to_bytes(), &dump[..]);
    }

    // 7.7.65.45 LE CS Subevent Result

    impl EventCode for LeCsSubeventResult {
        const CODE: Code = Code(LE_META, Some(0x31));
    }

    #[derive(Debug, Clone)]
    pub struct LeCsSubeventResult {
        pub connection_handle: u16,
        pub config_id: u8,
        pub start_acl_conn_event_counter: u16,
        pub procedure_counter: u16,
        pub frequency_compensation: u16,
        pub reference_power_level: i8,
        pub procedure_done_status: u8,
        pub subevent_done_status: u8,
        pub abort_reason: u8,
        pub num_antenna_paths: u8,
        pub steps: Vec<ResultStep>,
    }

    impl Read for LeCsSubeventResult {
        fn read(r: &mut Reader) -> Option<Self> {
            Some(Self {
                connection_handle: r.read_u16()?,
                config_id: r.read_u8()?,
                start_acl_conn_event_counter: r.read_u16()?,
                procedure_counter: r.read_u16()?,
                frequency_compensation: r.read_u16()?,
                reference_power_level: r.read_i8()?,
                procedure_done_status: r.read_u8()?,
                subevent_done_status: r.read_u8()?,
                abort_reason: r.read_u8()?,
                num_antenna_paths: r.read_u8()?,
                steps: r.read()?,
            })
        }
    }

    impl Write for LeCsSubeventResult {
        fn write(&self, w: &mut Writer) {
            w.write_u16(self.connection_handle);
            w.write_u8(self.config_id);
            w.write_u16(self.start_acl_conn_event_counter);
            w.write_u16(self.procedure_counter);
            w.write_u16(self.frequency_compensation);
            w.write_i8(self.reference_power_level);
            w.write_u8(self.procedure_done_status);
            w.write_u8(self.subevent_done_status);
            w.write_u8(self.abort_reason);
            w.write_u8(self.num_antenna_paths);
            w.write(&self.steps);
        }
    }

    // 7.7.65.46 LE CS Subevent Result Continue

    impl EventCode for LeCsSubeventResultContinue {
        const CODE: Code = Code(LE_META, Some(0x32));
    }

    #[derive(Debug, Clone)]
    pub struct LeCsSubeventResultContinue {
        pub connection_handle: u16,
        pub config_id: u8,
        pub procedure_done_status: u8,
        pub subevent_done_status: u8,
        pub abort_reason: u8,
        pub num_antenna_paths: u8,
        pub steps: Vec<ResultStep>,
    }

    impl Read for LeCsSubeventResultContinue {
        fn read(r: &mut Reader) -> Option<Self> {
            Some(Self {
                connection_handle: r.read_u16()?,
                config_id: r.read_u8()?,
                procedure_done_status: r.read_u8()?,
                subevent_done_status: r.read_u8()?,
                abort_reason: r.read_u8()?,
                num_antenna_paths: r.read_u8()?,
                steps: r.read()?,
            })
        }
    }

    impl Write for LeCsSubeventResultContinue {
        fn write(&self, w: &mut Writer) {
            w.write_u16(self.connection_handle);
            w.write_u8(self.config_id);
            w.write_u8(self.procedure_done_status);
            w.write_u8(self.subevent_done_status);
            w.write_u8(self.abort_reason);
            w.write_u8(self.num_antenna_paths);
            w.write(&self.steps);
        }
    }

    /// One CS result step of a subevent result
    #[derive(Debug, Clone)]
    pub struct ResultStep {
        pub mode: u8,
        pub channel: u8,
        pub data: Vec<u8>,
    }

    impl Read for ResultStep {
        fn read(r: &mut Reader) -> Option<Self> {
            Some(Self { mode: r.read_u8()?, channel: r.read_u8()?, data: r.read()? })
        }
    }

    impl Write for ResultStep {
        fn write(&self, w: &mut Writer) {
            w.write_u8(self.mode);
            w.write_u8(self.channel);
            w.write(&self.data);
        }
    }

    /// Mode-0 step data reported by the initiator
    #[derive(Debug, Clone)]
    pub struct CsMode0InitiatorData {
        pub packet_quality: u8,
        pub packet_rssi: i8,
        pub packet_antenna: u8,
        pub measured_freq_offset: u16,
    }

    impl CsMode0InitiatorData {
        pub fn from_bytes(data: &[u8]) -> Option<Self> {
            let mut r = Reader::new(data);
            Some(Self {
                packet_quality: r.read_u8()?,
                packet_rssi: r.read_i8()?,
                packet_antenna: r.read_u8()?,
                measured_freq_offset: r.read_u16()?,
            })
        }
    }

    /// Mode-0 step data reported by the reflector
    #[derive(Debug, Clone)]
    pub struct CsMode0ReflectorData {
        pub packet_quality: u8,
        pub packet_rssi: i8,
        pub packet_antenna: u8,
    }

    impl CsMode0ReflectorData {
        pub fn from_bytes(data: &[u8]) -> Option<Self> {
            let mut r = Reader::new(data);
            Some(Self {
                packet_quality: r.read_u8()?,
                packet_rssi: r.read_i8()?,
                packet_antenna: r.read_u8()?,
            })
        }
    }

    /// Mode-2 step data, one tone per antenna path plus the extension slot
    #[derive(Debug, Clone)]
    pub struct CsMode2Data {
        pub antenna_permutation_index: u8,
        pub tone_data: Vec<TonePct>,
    }

    impl CsMode2Data {
        pub fn from_bytes(data: &[u8], num_antenna_paths: u8) -> Option<Self> {
            let mut r = Reader::new(data);
            let antenna_permutation_index = r.read_u8()?;
            // Count in usize: a path count of 255 must not wrap the +1.
            let tone_data = (0..num_antenna_paths as usize + 1)
                .map(|_| {
                    let packed = r.read_u24()?;
                    Some(TonePct {
                        i_sample: (packed & 0x0fff) as u16,
                        q_sample: (packed >> 12 & 0x0fff) as u16,
                        quality: r.read_u8()?,
                    })
                })
                .collect::<Option<Vec<_>>>()?;
            Some(Self { antenna_permutation_index, tone_data })
        }
    }

    /// Phase correction term of one tone, 12-bit two's complement samples
    #[derive(Debug, Clone)]
    pub struct TonePct {
        pub i_sample: u16,
        pub q_sample: u16,
        pub quality: u8,
    }

    #[test]
    fn test_le_cs_subevent_result() {
        let dump = [
            0x3e, 0x1c, 0x31, 0x40, 0x00, 0x01, 0x10, 0x00, 0x05, 0x00, 0x34, 0x12, 0xec, 0x00,
            0x00, 0x00, 0x01, 0x01, 0x02, 0x05, 0x09, 0x00, 0xff, 0x0f, 0x80, 0x00, 0x12, 0x34,
            0x56, 0x01,
        ];
        let Ok(Event::LeCsSubeventResult(e)) = Event::from_bytes(&dump) else { panic!() };
        assert_eq!(e.connection_handle, 0x40);
        assert_eq!(e.config_id, 0x01);
        assert_eq!(e.start_acl_conn_event_counter, 0x10);
        assert_eq!(e.procedure_counter, 5);
        assert_eq!(e.frequency_compensation, 0x1234);
        assert_eq!(e.reference_power_level, -20);
        assert_eq!(e.procedure_done_status, 0x00);
        assert_eq!(e.subevent_done_status, 0x00);
        assert_eq!(e.num_antenna_paths, 1);
        assert_eq!(e.steps.len(), 1);
        let step = &e.steps[0];
        assert_eq!(step.mode, 2);
        assert_eq!(step.channel, 5);
        let data = CsMode2Data::from_bytes(&step.data, e.num_antenna_paths).unwrap();
        assert_eq!(data.antenna_permutation_index, 0);
        assert_eq!(data.tone_data.len(), 2);
        assert_eq!(data.tone_data[0].i_sample, 0xfff);
        assert_eq!(data.tone_data[0].q_sample, 0x800);
        assert_eq!(data.tone_data[0].quality, 0x00);
        assert_eq!(e.to_bytes(), &dump[..]);
    }

    #[test]
    fn test_cs_mode_2_data_bogus_path_count() {
        // A payload far too short for the claimed path count fails the
        // parse instead of panicking.
        assert!(CsMode2Data::from_bytes(&[0x00], 0xff).is_none());
    }

    #[test]
    fn test_le_cs_subevent_result_continue() {
        let dump = [
            0x3e, 0x11, 0x32, 0x40, 0x00, 0x01, 0x00, 0x04, 0x06, 0x01, 0x01, 0x00, 0x03, 0x05,
            0x00, 0x41, 0x02, 0x00, 0x00,
        ];
        let Ok(Event::LeCsSubeventResultContinue(e)) = Event::from_bytes(&dump) else { panic!() };
        assert_eq!(e.connection_handle, 0x40);
        assert_eq!(e.procedure_done_status, 0x00);
        assert_eq!(e.subevent_done_status, 0x04);
        assert_eq!(e.abort_reason, 0x06);
        assert_eq!(e.steps.len(), 1);
        let step = &e.steps[0];
        assert_eq!(step.mode, 0);
        assert_eq!(step.channel, 3);
        let data = CsMode0InitiatorData::from_bytes(&step.data).unwrap();
        assert_eq!(data.packet_quality, 0x00);
        assert_eq!(data.packet_rssi, 0x41);
        assert_eq!(data.packet_antenna, 0x02);
        assert_eq!(data.measured_freq_offset, 0x0000);
        assert_eq!(e.to_bytes(), &dump[..]);
    }
}
