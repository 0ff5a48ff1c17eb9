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

/// Status / Error codes, as defined in Part F
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Status {
    Success,
    UnknownHciCommand,
    UnknownConnectionIdentifier,
    HardwareFailure,
    AuthenticationFailure,
    MemoryCapacityExceeded,
    ConnectionTimeout,
    ConnectionLimitExceeded,
    ConnectionAlreadyExists,
    CommandDisallowed,
    ConnectionRejectedLimitedResources,
    UnsupportedFeatureOrParameterValue,
    InvalidHciCommandParameters,
    RemoteUserTerminatedConnection,
    ConnectionTerminatedByLocalHost,
    UnsupportedRemoteFeature,
    UnspecifiedError,
    InstantPassed,
    InsufficientSecurity,
    ParameterOutOfMandatoryRange,
    HostBusy,
    ControllerBusy,
    UnacceptableConnectionParameters,
    AdvertisingTimeout,
    ConnectionFailedEstablished,
    UnknownAdvertisingIdentifier,
    LimitReached,
    OperationCancelledByHost,
    PacketTooLong,
    Unknown(u8),
}

impl From<u8> for Status {
    fn from(v: u8) -> Self {
        match v {
            0x00 => Self::Success,
            0x01 => Self::UnknownHciCommand,
            0x02 => Self::UnknownConnectionIdentifier,
            0x03 => Self::HardwareFailure,
            0x05 => Self::AuthenticationFailure,
            0x07 => Self::MemoryCapacityExceeded,
            0x08 => Self::ConnectionTimeout,
            0x09 => Self::ConnectionLimitExceeded,
            0x0b => Self::ConnectionAlreadyExists,
            0x0c => Self::CommandDisallowed,
            0x0d => Self::ConnectionRejectedLimitedResources,
            0x11 => Self::UnsupportedFeatureOrParameterValue,
            0x12 => Self::InvalidHciCommandParameters,
            0x13 => Self::RemoteUserTerminatedConnection,
            0x16 => Self::ConnectionTerminatedByLocalHost,
            0x1a => Self::UnsupportedRemoteFeature,
            0x1f => Self::UnspecifiedError,
            0x28 => Self::InstantPassed,
            0x2f => Self::InsufficientSecurity,
            0x30 => Self::ParameterOutOfMandatoryRange,
            0x38 => Self::HostBusy,
            0x3a => Self::ControllerBusy,
            0x3b => Self::UnacceptableConnectionParameters,
            0x3c => Self::AdvertisingTimeout,
            0x3e => Self::ConnectionFailedEstablished,
            0x42 => Self::UnknownAdvertisingIdentifier,
            0x43 => Self::LimitReached,
            0x44 => Self::OperationCancelledByHost,
            0x45 => Self::PacketTooLong,
            v => Self::Unknown(v),
        }
    }
}

impl From<Status> for u8 {
    fn from(status: Status) -> Self {
        match status {
            Status::Success => 0x00,
            Status::UnknownHciCommand => 0x01,
            Status::UnknownConnectionIdentifier => 0x02,
            Status::HardwareFailure => 0x03,
            Status::AuthenticationFailure => 0x05,
            Status::MemoryCapacityExceeded => 0x07,
            Status::ConnectionTimeout => 0x08,
            Status::ConnectionLimitExceeded => 0x09,
            Status::ConnectionAlreadyExists => 0x0b,
            Status::CommandDisallowed => 0x0c,
            Status::ConnectionRejectedLimitedResources => 0x0d,
            Status::UnsupportedFeatureOrParameterValue => 0x11,
            Status::InvalidHciCommandParameters => 0x12,
            Status::RemoteUserTerminatedConnection => 0x13,
            Status::ConnectionTerminatedByLocalHost => 0x16,
            Status::UnsupportedRemoteFeature => 0x1a,
            Status::UnspecifiedError => 0x1f,
            Status::InstantPassed => 0x28,
            Status::InsufficientSecurity => 0x2f,
            Status::ParameterOutOfMandatoryRange => 0x30,
            Status::HostBusy => 0x38,
            Status::ControllerBusy => 0x3a,
            Status::UnacceptableConnectionParameters => 0x3b,
            Status::AdvertisingTimeout => 0x3c,
            Status::ConnectionFailedEstablished => 0x3e,
            Status::UnknownAdvertisingIdentifier => 0x42,
            Status::LimitReached => 0x43,
            Status::OperationCancelledByHost => 0x44,
            Status::PacketTooLong => 0x45,
            Status::Unknown(v) => v,
        }
    }
}

impl Status {
    /// Whether the status reports a successful operation
    pub fn is_success(&self) -> bool {
        *self == Status::Success
    }
}

impl Read for Status {
    fn read(r: &mut Reader) -> Option<Self> {
        Some(r.read_u8()?.into())
    }
}

impl Write for Status {
    fn write(&self, w: &mut Writer) {
        w.write_u8((*self).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for v in 0u8..=0xff {
            let status = Status::from(v);
            assert_eq!(u8::from(status), v);
        }
        assert!(Status::from(0x00).is_success());
        assert!(!Status::from(0x0c).is_success());
    }
}
