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

//! Byte-level codecs for the HCI commands and events used by the LE Audio
//! broadcast and distance measurement (Channel Sounding / RSSI) subsystems:
//! BIG management, ISO data paths, transmit power reporting and the
//! LE CS command/subevent set.

mod command;
mod event;
mod reader;
mod status;
mod writer;

pub use command::*;
pub use event::*;
pub use status::*;
