//! Distance measurement over RSSI polling and Channel Sounding.
//!
//! RSSI trackers poll `Read RSSI` on a timer and convert the sample to a
//! distance with the free-space path loss approximation. CS trackers drive
//! the Channel Sounding setup command chain and correlate multi-part
//! subevent results into complete procedure data, decoding the antenna
//! permutation and the 12-bit I/Q tone samples along the way.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use log::{info, warn};
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;

use btle_hci::{
    Command, CommandOpCode, Event, LeCsCreateConfig, LeCsProcedureEnable,
    LeCsReadRemoteSupportedCapabilities, LeCsSecurityEnable, LeCsSetDefaultSettings,
    LeCsSetProcedureParameters, LeReadRemoteTransmitPowerLevel,
    LeSetTransmitPowerReportingEnable, ReadRssi, ResultStep, ReturnParameters,
};

use crate::callbacks::Callbacks;
use crate::{Message, RawAddress};

/// Free-space path loss at one meter, 2.4 GHz band.
const RSSI_DROP_OFF_AT_1M_DB: i32 = 41;

/// 7.8.118: reporting a remote transmit power level of 126 or 127 means the
/// value is not available.
const TX_POWER_NOT_AVAILABLE: i8 = 126;

const CS_CONFIG_ID: u8 = 0x01;
const CS_CREATE_CONTEXT_BOTH: u8 = 0x01;
const CS_MAIN_MODE_2: u8 = 0x02;
const CS_SUB_MODE_UNUSED: u8 = 0xff;
const CS_MIN_MAIN_MODE_STEPS: u8 = 0x02;
const CS_MAX_MAIN_MODE_STEPS: u8 = 0x05;
const CS_MODE_0_STEPS: u8 = 0x03;
const CS_ROLE_INITIATOR: u8 = 0x00;
/// 128-bit random payload RTT sequence.
const CS_RTT_TYPE: u8 = 0x02;
const CS_SYNC_PHY_1M: u8 = 0x01;
/// All 72 channels, `1FFFFFFFFFFFFC7FFFFC` byte-reversed on the wire.
const CS_CHANNEL_MAP: [u8; 10] =
    [0xfc, 0xff, 0x7f, 0xfc, 0xff, 0xff, 0xff, 0xff, 0xff, 0x1f];
const CS_CHANNEL_MAP_REPETITION: u8 = 0x01;
const CS_CHANNEL_SELECTION_TYPE_3B: u8 = 0x01;
const CS_CH3C_SHAPE_HAT: u8 = 0x00;
const CS_CH3C_JUMP: u8 = 0x03;

const CS_ROLE_ENABLE_BOTH: u8 = 0x03;
const CS_SYNC_ANTENNA_SELECTION: u8 = 0x02;
const CS_MAX_TX_POWER_DBM: u8 = 0x0c;

const CS_MAX_PROCEDURE_LEN: u16 = 0xffff;
const CS_MIN_PROCEDURE_INTERVAL: u16 = 0x01;
const CS_MAX_PROCEDURE_INTERVAL: u16 = 0xff;
const CS_PROCEDURE_COUNT: u16 = 0x01;
const CS_MIN_SUBEVENT_LEN: u32 = 0x0004e2;
const CS_MAX_SUBEVENT_LEN: u32 = 0x3d0900;
const CS_TONE_ANTENNA_CONFIG: u8 = 0x07;
const CS_PREFERRED_PEER_ANTENNA: u8 = 0x01;
const CS_SNR_CONTROL_NOT_APPLIED: u8 = 0xff;

const CS_PROCEDURE_DONE_COMPLETE: u8 = 0x0;
const CS_PROCEDURE_DONE_PARTIAL: u8 = 0x1;
const CS_PROCEDURE_DONE_ABORTED: u8 = 0xf;

/// A config complete with this action reports a removed configuration.
const CS_CONFIG_ACTION_REMOVED: u8 = 0x00;

const CS_PROCEDURE_ENABLED: u8 = 0x01;

pub const PROCEDURE_RING_CAPACITY: usize = 16;

/// Antenna path permutations indexed by the mode-2 permutation index. The
/// k-th delivered tone belongs to path `table[index][k] - 1`.
const CS_ANTENNA_PERMUTATION: [[u8; 4]; 24] = [
    [1, 2, 3, 4],
    [2, 1, 3, 4],
    [1, 3, 2, 4],
    [3, 1, 2, 4],
    [3, 2, 1, 4],
    [2, 3, 1, 4],
    [1, 2, 4, 3],
    [2, 1, 4, 3],
    [1, 4, 2, 3],
    [4, 1, 2, 3],
    [4, 2, 1, 3],
    [2, 4, 1, 3],
    [1, 4, 3, 2],
    [4, 1, 3, 2],
    [1, 3, 4, 2],
    [3, 1, 4, 2],
    [3, 4, 1, 2],
    [4, 3, 1, 2],
    [4, 2, 3, 1],
    [2, 4, 3, 1],
    [4, 3, 2, 1],
    [3, 4, 2, 1],
    [3, 2, 4, 1],
    [2, 3, 4, 1],
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceMeasurementMethod {
    Rssi,
    ChannelSounding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceMeasurementError {
    NoConnection,
    InternalError,
}

/// Distance measurement callback surface.
pub trait IDistanceMeasurementCallbacks: Send {
    fn on_started(&mut self, address: RawAddress, method: DistanceMeasurementMethod);
    fn on_start_fail(
        &mut self,
        address: RawAddress,
        error: DistanceMeasurementError,
        method: DistanceMeasurementMethod,
    );
    fn on_stopped(&mut self, address: RawAddress, method: DistanceMeasurementMethod);
    /// One RSSI-derived distance sample, in centimeters.
    fn on_result(&mut self, address: RawAddress, distance_cm: u32);
    /// A CS procedure with both sides complete and not aborted.
    fn on_procedure_data_ready(&mut self, address: RawAddress, data: &CsProcedureData);
}

/// Outgoing HCI command sink.
pub trait HciCommander: Send {
    fn send_command(&mut self, command: Command);
}

/// ACL connection lookup.
pub trait AclProvider: Send {
    fn connection_handle(&self, address: RawAddress) -> Option<u16>;
    fn address_of(&self, connection_handle: u16) -> Option<RawAddress>;
}

/// Timer callbacks re-posted into the serialized dispatch context.
#[derive(Debug)]
pub enum DistanceActions {
    ReadRssi { address: RawAddress },
    EnableCsProcedure { connection_handle: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsProcedureDoneStatus {
    Partial,
    Complete,
    Aborted,
}

impl CsProcedureDoneStatus {
    fn from_raw(raw: u8) -> Self {
        match raw {
            CS_PROCEDURE_DONE_COMPLETE => Self::Complete,
            CS_PROCEDURE_DONE_PARTIAL => Self::Partial,
            CS_PROCEDURE_DONE_ABORTED => Self::Aborted,
            raw => {
                warn!("unknown procedure done status {:#x}", raw);
                Self::Partial
            }
        }
    }
}

/// Accumulated data of one CS procedure, both sides.
#[derive(Debug, Clone)]
pub struct CsProcedureData {
    pub counter: u16,
    pub num_antenna_paths: u8,
    pub frequency_compensation: Vec<u16>,
    pub step_channels: Vec<u8>,
    pub measured_freq_offsets: Vec<u16>,
    /// Per antenna path, the last slot holds the tone extension.
    pub tone_pct_initiator: Vec<Vec<(f64, f64)>>,
    pub tone_quality_initiator: Vec<Vec<u8>>,
    pub tone_pct_reflector: Vec<Vec<(f64, f64)>>,
    pub tone_quality_reflector: Vec<Vec<u8>>,
    pub aborted: bool,
    pub local_status: CsProcedureDoneStatus,
    pub remote_status: CsProcedureDoneStatus,
}

impl CsProcedureData {
    fn new(counter: u16, num_antenna_paths: u8) -> Self {
        let paths = num_antenna_paths as usize + 1;
        Self {
            counter,
            num_antenna_paths,
            frequency_compensation: vec![],
            step_channels: vec![],
            measured_freq_offsets: vec![],
            tone_pct_initiator: vec![vec![]; paths],
            tone_quality_initiator: vec![vec![]; paths],
            tone_pct_reflector: vec![vec![]; paths],
            tone_quality_reflector: vec![vec![]; paths],
            aborted: false,
            local_status: CsProcedureDoneStatus::Partial,
            remote_status: CsProcedureDoneStatus::Partial,
        }
    }

    fn is_ready(&self) -> bool {
        !self.aborted
            && self.local_status == CsProcedureDoneStatus::Complete
            && self.remote_status == CsProcedureDoneStatus::Complete
    }

    fn is_finished(&self) -> bool {
        self.local_status != CsProcedureDoneStatus::Partial
            && self.remote_status != CsProcedureDoneStatus::Partial
    }
}

/// Bounded ring of in-flight procedures, oldest evicted beyond capacity.
#[derive(Default)]
pub struct ProcedureRing {
    entries: VecDeque<CsProcedureData>,
}

impl ProcedureRing {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn get_or_insert(&mut self, counter: u16, num_antenna_paths: u8) -> &mut CsProcedureData {
        if let Some(pos) = self.entries.iter().position(|p| p.counter == counter) {
            return &mut self.entries[pos];
        }
        if self.entries.len() == PROCEDURE_RING_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(CsProcedureData::new(counter, num_antenna_paths));
        self.entries.back_mut().unwrap()
    }

    fn latest_mut(&mut self) -> Option<&mut CsProcedureData> {
        self.entries.back_mut()
    }

    fn find(&self, counter: u16) -> Option<&CsProcedureData> {
        self.entries.iter().find(|p| p.counter == counter)
    }

    /// Drops every entry strictly older than the given counter.
    fn evict_older_than(&mut self, counter: u16) {
        self.entries.retain(|p| p.counter >= counter);
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

struct RssiTracker {
    address: RawAddress,
    connection_handle: u16,
    interval_ms: u64,
    remote_tx_power: Option<i8>,
    started: bool,
    timer: Option<JoinHandle<()>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CsRole {
    Initiator,
    Reflector,
}

struct CsTracker {
    address: RawAddress,
    role: CsRole,
    interval_ms: u64,
    /// A local start request is waiting for its started callback.
    waiting_for_start: bool,
    started: bool,
    config_id: Option<u8>,
    selected_tx_power: Option<i8>,
    timer: Option<JoinHandle<()>>,
    procedures: ProcedureRing,
}

impl CsTracker {
    fn new(address: RawAddress, role: CsRole, interval_ms: u64) -> Self {
        Self {
            address,
            role,
            interval_ms,
            waiting_for_start: role == CsRole::Initiator,
            started: false,
            config_id: None,
            selected_tx_power: None,
            timer: None,
            procedures: ProcedureRing::default(),
        }
    }
}

pub struct DistanceMeasurementManager {
    callbacks: Callbacks<dyn IDistanceMeasurementCallbacks + Send>,
    hci: Box<dyn HciCommander>,
    acl: Box<dyn AclProvider>,
    tx: Sender<Message>,
    rssi_trackers: HashMap<RawAddress, RssiTracker>,
    cs_trackers: HashMap<u16, CsTracker>,
}

impl DistanceMeasurementManager {
    pub fn new(tx: Sender<Message>, hci: Box<dyn HciCommander>, acl: Box<dyn AclProvider>) -> Self {
        Self {
            callbacks: Callbacks::new(tx.clone(), Message::DistanceMeasurementCallbackDisconnected),
            hci,
            acl,
            tx,
            rssi_trackers: HashMap::new(),
            cs_trackers: HashMap::new(),
        }
    }

    pub fn register_callback(
        &mut self,
        callback: Box<dyn IDistanceMeasurementCallbacks + Send>,
    ) -> u32 {
        self.callbacks.add_callback(callback)
    }

    pub fn unregister_callback(&mut self, callback_id: u32) -> bool {
        self.callbacks.remove_callback(callback_id)
    }

    pub fn start_distance_measurement(
        &mut self,
        address: RawAddress,
        interval_ms: u64,
        method: DistanceMeasurementMethod,
    ) {
        let Some(connection_handle) = self.acl.connection_handle(address) else {
            warn!("no connection to {}", address);
            self.callbacks.for_all_callbacks(|cb| {
                cb.on_start_fail(address, DistanceMeasurementError::NoConnection, method)
            });
            return;
        };

        match method {
            DistanceMeasurementMethod::Rssi => {
                if let Some(tracker) = self.rssi_trackers.get_mut(&address) {
                    tracker.interval_ms = interval_ms;
                    if tracker.started {
                        if let Some(timer) = tracker.timer.take() {
                            timer.abort();
                        }
                        tracker.timer = Some(spawn_rssi_timer(self.tx.clone(), address, interval_ms));
                    }
                    return;
                }
                self.rssi_trackers.insert(
                    address,
                    RssiTracker {
                        address,
                        connection_handle,
                        interval_ms,
                        remote_tx_power: None,
                        started: false,
                        timer: None,
                    },
                );
                self.hci.send_command(Command::LeReadRemoteTransmitPowerLevel(
                    LeReadRemoteTransmitPowerLevel { connection_handle, phy: CS_SYNC_PHY_1M },
                ));
            }
            DistanceMeasurementMethod::ChannelSounding => {
                if let Some(tracker) = self.cs_trackers.get_mut(&connection_handle) {
                    tracker.address = address;
                    tracker.interval_ms = interval_ms;
                    if tracker.started {
                        self.callbacks.for_all_callbacks(|cb| {
                            cb.on_started(address, DistanceMeasurementMethod::ChannelSounding)
                        });
                    } else {
                        tracker.waiting_for_start = true;
                    }
                    return;
                }
                self.cs_trackers.insert(
                    connection_handle,
                    CsTracker::new(address, CsRole::Initiator, interval_ms),
                );
                self.hci.send_command(Command::LeCsReadRemoteSupportedCapabilities(
                    LeCsReadRemoteSupportedCapabilities { connection_handle },
                ));
            }
        }
    }

    /// Stopping an address with no tracker is nothing to do.
    pub fn stop_distance_measurement(
        &mut self,
        address: RawAddress,
        method: DistanceMeasurementMethod,
    ) {
        match method {
            DistanceMeasurementMethod::Rssi => {
                let Some(mut tracker) = self.rssi_trackers.remove(&address) else {
                    info!("no RSSI tracker for {}", address);
                    return;
                };
                if let Some(timer) = tracker.timer.take() {
                    timer.abort();
                }
                self.hci.send_command(Command::LeSetTransmitPowerReportingEnable(
                    LeSetTransmitPowerReportingEnable {
                        connection_handle: tracker.connection_handle,
                        local_enable: 0x00,
                        remote_enable: 0x00,
                    },
                ));
                self.callbacks
                    .for_all_callbacks(|cb| cb.on_stopped(address, DistanceMeasurementMethod::Rssi));
            }
            DistanceMeasurementMethod::ChannelSounding => {
                let Some(connection_handle) = self
                    .cs_trackers
                    .iter()
                    .find(|(_, t)| t.address == address)
                    .map(|(handle, _)| *handle)
                else {
                    info!("no CS tracker for {}", address);
                    return;
                };
                let mut tracker = self.cs_trackers.remove(&connection_handle).unwrap();
                if let Some(timer) = tracker.timer.take() {
                    timer.abort();
                }
                if let Some(config_id) = tracker.config_id {
                    self.hci.send_command(Command::LeCsProcedureEnable(LeCsProcedureEnable {
                        connection_handle,
                        config_id,
                        enable: 0x00,
                    }));
                }
                self.callbacks.for_all_callbacks(|cb| {
                    cb.on_stopped(address, DistanceMeasurementMethod::ChannelSounding)
                });
            }
        }
    }

    /// Tears down every tracker of a closed connection.
    pub fn on_connection_closed(&mut self, address: RawAddress) {
        if let Some(mut tracker) = self.rssi_trackers.remove(&address) {
            if let Some(timer) = tracker.timer.take() {
                timer.abort();
            }
            self.callbacks
                .for_all_callbacks(|cb| cb.on_stopped(address, DistanceMeasurementMethod::Rssi));
        }
        let handles: Vec<u16> = self
            .cs_trackers
            .iter()
            .filter(|(_, t)| t.address == address)
            .map(|(handle, _)| *handle)
            .collect();
        for handle in handles {
            let mut tracker = self.cs_trackers.remove(&handle).unwrap();
            if let Some(timer) = tracker.timer.take() {
                timer.abort();
            }
            self.callbacks.for_all_callbacks(|cb| {
                cb.on_stopped(address, DistanceMeasurementMethod::ChannelSounding)
            });
        }
    }

    pub fn handle_action(&mut self, action: DistanceActions) {
        match action {
            DistanceActions::ReadRssi { address } => {
                if !self.rssi_trackers.contains_key(&address) {
                    return;
                }
                // Connection loss stops the poll instead of spinning on a
                // dead handle.
                let Some(connection_handle) = self.acl.connection_handle(address) else {
                    self.on_connection_closed(address);
                    return;
                };
                self.hci.send_command(Command::ReadRssi(ReadRssi { connection_handle }));
            }
            DistanceActions::EnableCsProcedure { connection_handle } => {
                let Some(tracker) = self.cs_trackers.get(&connection_handle) else { return };
                let Some(config_id) = tracker.config_id else { return };
                self.hci.send_command(Command::LeCsProcedureEnable(LeCsProcedureEnable {
                    connection_handle,
                    config_id,
                    enable: CS_PROCEDURE_ENABLED,
                }));
            }
        }
    }

    pub fn handle_event(&mut self, event: Event) {
        match event {
            Event::CommandStatus(status) => {
                if status.status.is_success() {
                    return;
                }
                if status.opcode == LeReadRemoteTransmitPowerLevel::OPCODE {
                    self.fail_pending_rssi_trackers();
                }
            }
            Event::CommandComplete(complete) => match complete.return_parameters {
                ReturnParameters::ReadRssi(p) => {
                    if p.status.is_success() {
                        self.on_rssi_read(p.connection_handle, p.rssi);
                    }
                }
                ReturnParameters::LeSetTransmitPowerReportingEnable(p) => {
                    self.on_reporting_enabled(p.connection_handle, p.status.is_success());
                }
                ReturnParameters::LeCsSetDefaultSettings(p) => {
                    if p.status.is_success() {
                        self.on_cs_default_settings_set(p.connection_handle);
                    } else {
                        self.fail_cs_setup(p.connection_handle);
                    }
                }
                ReturnParameters::LeCsSetProcedureParameters(p) => {
                    if p.status.is_success() {
                        self.hci.send_command(Command::LeCsProcedureEnable(LeCsProcedureEnable {
                            connection_handle: p.connection_handle,
                            config_id: CS_CONFIG_ID,
                            enable: CS_PROCEDURE_ENABLED,
                        }));
                    } else {
                        self.fail_cs_setup(p.connection_handle);
                    }
                }
                _ => {}
            },
            Event::LeTransmitPowerReporting(e) => {
                // Local power changes are not distance relevant.
                if e.reason == 0x00 {
                    return;
                }
                self.on_remote_tx_power(e.connection_handle, e.transmit_power_level);
            }
            Event::LeCsReadRemoteSupportedCapabilitiesComplete(e) => {
                if !e.status.is_success() {
                    self.fail_cs_setup(e.connection_handle);
                    return;
                }
                self.on_cs_remote_capabilities(e.connection_handle);
            }
            Event::LeCsSecurityEnableComplete(e) => {
                if !e.status.is_success() {
                    self.fail_cs_setup(e.connection_handle);
                    return;
                }
                self.on_cs_security_enabled(e.connection_handle);
            }
            Event::LeCsConfigComplete(e) => {
                if !e.status.is_success() {
                    self.fail_cs_setup(e.connection_handle);
                    return;
                }
                if e.action == CS_CONFIG_ACTION_REMOVED {
                    return;
                }
                self.on_cs_config_created(e.connection_handle, e.config_id);
            }
            Event::LeCsProcedureEnableComplete(e) => {
                if !e.status.is_success() {
                    self.fail_cs_setup(e.connection_handle);
                    return;
                }
                if e.state == CS_PROCEDURE_ENABLED {
                    self.on_cs_procedure_enabled(
                        e.connection_handle,
                        e.config_id,
                        e.selected_tx_power,
                    );
                }
            }
            Event::LeCsSubeventResult(e) => {
                self.aggregate_subevent(
                    e.connection_handle,
                    Some(e.procedure_counter),
                    Some(e.frequency_compensation),
                    e.procedure_done_status,
                    e.abort_reason,
                    e.num_antenna_paths,
                    &e.steps,
                    true,
                );
            }
            Event::LeCsSubeventResultContinue(e) => {
                self.aggregate_subevent(
                    e.connection_handle,
                    None,
                    None,
                    e.procedure_done_status,
                    e.abort_reason,
                    e.num_antenna_paths,
                    &e.steps,
                    true,
                );
            }
            _ => {}
        }
    }

    /// Feeds a subevent result relayed from the remote side into the same
    /// aggregation, keyed as remote data.
    pub fn handle_remote_event(&mut self, event: Event) {
        match event {
            Event::LeCsSubeventResult(e) => {
                self.aggregate_subevent(
                    e.connection_handle,
                    Some(e.procedure_counter),
                    Some(e.frequency_compensation),
                    e.procedure_done_status,
                    e.abort_reason,
                    e.num_antenna_paths,
                    &e.steps,
                    false,
                );
            }
            Event::LeCsSubeventResultContinue(e) => {
                self.aggregate_subevent(
                    e.connection_handle,
                    None,
                    None,
                    e.procedure_done_status,
                    e.abort_reason,
                    e.num_antenna_paths,
                    &e.steps,
                    false,
                );
            }
            _ => {}
        }
    }

    /// A rejected transmit power read fails every tracker still waiting on
    /// its setup.
    fn fail_pending_rssi_trackers(&mut self) {
        let pending: Vec<RawAddress> = self
            .rssi_trackers
            .values()
            .filter(|t| !t.started)
            .map(|t| t.address)
            .collect();
        for address in pending {
            self.rssi_trackers.remove(&address);
            self.callbacks.for_all_callbacks(|cb| {
                cb.on_start_fail(
                    address,
                    DistanceMeasurementError::InternalError,
                    DistanceMeasurementMethod::Rssi,
                )
            });
        }
    }

    fn on_rssi_read(&mut self, connection_handle: u16, rssi: i8) {
        let Some(tracker) =
            self.rssi_trackers.values().find(|t| t.connection_handle == connection_handle)
        else {
            return;
        };
        let Some(tx_power) = tracker.remote_tx_power else { return };
        let address = tracker.address;
        let distance_cm = compute_distance_cm(tx_power, rssi);
        self.callbacks.for_all_callbacks(|cb| cb.on_result(address, distance_cm));
    }

    fn on_remote_tx_power(&mut self, connection_handle: u16, transmit_power_level: i8) {
        let Some(tracker) =
            self.rssi_trackers.values_mut().find(|t| t.connection_handle == connection_handle)
        else {
            return;
        };
        if transmit_power_level >= TX_POWER_NOT_AVAILABLE {
            let address = tracker.address;
            warn!("remote transmit power not available for {}", address);
            self.rssi_trackers.remove(&address);
            self.callbacks.for_all_callbacks(|cb| {
                cb.on_start_fail(
                    address,
                    DistanceMeasurementError::InternalError,
                    DistanceMeasurementMethod::Rssi,
                )
            });
            return;
        }
        tracker.remote_tx_power = Some(transmit_power_level);
        if !tracker.started {
            self.hci.send_command(Command::LeSetTransmitPowerReportingEnable(
                LeSetTransmitPowerReportingEnable {
                    connection_handle,
                    local_enable: 0x00,
                    remote_enable: 0x01,
                },
            ));
        }
    }

    fn on_reporting_enabled(&mut self, connection_handle: u16, success: bool) {
        let Some(tracker) =
            self.rssi_trackers.values_mut().find(|t| t.connection_handle == connection_handle)
        else {
            return;
        };
        let address = tracker.address;
        if !success {
            self.rssi_trackers.remove(&address);
            self.callbacks.for_all_callbacks(|cb| {
                cb.on_start_fail(
                    address,
                    DistanceMeasurementError::InternalError,
                    DistanceMeasurementMethod::Rssi,
                )
            });
            return;
        }
        if !tracker.started {
            tracker.started = true;
            tracker.timer = Some(spawn_rssi_timer(self.tx.clone(), address, tracker.interval_ms));
            self.callbacks
                .for_all_callbacks(|cb| cb.on_started(address, DistanceMeasurementMethod::Rssi));
        }
    }

    fn on_cs_remote_capabilities(&mut self, connection_handle: u16) {
        if !self.cs_trackers.contains_key(&connection_handle) {
            // The peer started the procedure, follow as reflector.
            let Some(address) = self.address_of(connection_handle) else { return };
            self.cs_trackers
                .insert(connection_handle, CsTracker::new(address, CsRole::Reflector, 0));
        }
        self.hci.send_command(Command::LeCsSetDefaultSettings(LeCsSetDefaultSettings {
            connection_handle,
            role_enable: CS_ROLE_ENABLE_BOTH,
            cs_sync_antenna_selection: CS_SYNC_ANTENNA_SELECTION,
            max_tx_power: CS_MAX_TX_POWER_DBM,
        }));
    }

    fn on_cs_default_settings_set(&mut self, connection_handle: u16) {
        let Some(tracker) = self.cs_trackers.get(&connection_handle) else { return };
        if tracker.role != CsRole::Initiator {
            return;
        }
        self.hci.send_command(Command::LeCsSecurityEnable(LeCsSecurityEnable {
            connection_handle,
        }));
    }

    fn on_cs_security_enabled(&mut self, connection_handle: u16) {
        let Some(tracker) = self.cs_trackers.get(&connection_handle) else { return };
        if tracker.role != CsRole::Initiator {
            return;
        }
        self.hci.send_command(Command::LeCsCreateConfig(LeCsCreateConfig {
            connection_handle,
            config_id: CS_CONFIG_ID,
            create_context: CS_CREATE_CONTEXT_BOTH,
            main_mode_type: CS_MAIN_MODE_2,
            sub_mode_type: CS_SUB_MODE_UNUSED,
            min_main_mode_steps: CS_MIN_MAIN_MODE_STEPS,
            max_main_mode_steps: CS_MAX_MAIN_MODE_STEPS,
            main_mode_repetition: 0x00,
            mode_0_steps: CS_MODE_0_STEPS,
            role: CS_ROLE_INITIATOR,
            rtt_type: CS_RTT_TYPE,
            cs_sync_phy: CS_SYNC_PHY_1M,
            channel_map: CS_CHANNEL_MAP,
            channel_map_repetition: CS_CHANNEL_MAP_REPETITION,
            channel_selection_type: CS_CHANNEL_SELECTION_TYPE_3B,
            ch3c_shape: CS_CH3C_SHAPE_HAT,
            ch3c_jump: CS_CH3C_JUMP,
            reserved: 0x00,
        }));
    }

    fn on_cs_config_created(&mut self, connection_handle: u16, config_id: u8) {
        let Some(tracker) = self.cs_trackers.get_mut(&connection_handle) else { return };
        tracker.config_id = Some(config_id);
        if tracker.role != CsRole::Initiator {
            return;
        }
        self.hci.send_command(Command::LeCsSetProcedureParameters(LeCsSetProcedureParameters {
            connection_handle,
            config_id,
            max_procedure_len: CS_MAX_PROCEDURE_LEN,
            min_procedure_interval: CS_MIN_PROCEDURE_INTERVAL,
            max_procedure_interval: CS_MAX_PROCEDURE_INTERVAL,
            max_procedure_count: CS_PROCEDURE_COUNT,
            min_subevent_len: CS_MIN_SUBEVENT_LEN,
            max_subevent_len: CS_MAX_SUBEVENT_LEN,
            tone_antenna_config_selection: CS_TONE_ANTENNA_CONFIG,
            phy: CS_SYNC_PHY_1M,
            tx_power_delta: 0x00,
            preferred_peer_antenna: CS_PREFERRED_PEER_ANTENNA,
            snr_control_initiator: CS_SNR_CONTROL_NOT_APPLIED,
            snr_control_reflector: CS_SNR_CONTROL_NOT_APPLIED,
        }));
    }

    fn on_cs_procedure_enabled(
        &mut self,
        connection_handle: u16,
        config_id: u8,
        selected_tx_power: i8,
    ) {
        let Some(tracker) = self.cs_trackers.get_mut(&connection_handle) else { return };
        tracker.config_id = Some(config_id);
        tracker.selected_tx_power = Some(selected_tx_power);
        // Data buffered before the procedure went live is stale.
        tracker.procedures.clear();
        if !tracker.started {
            tracker.started = true;
            let notify = tracker.waiting_for_start;
            tracker.waiting_for_start = false;
            let address = tracker.address;
            if tracker.interval_ms > 0 {
                tracker.timer = Some(spawn_cs_timer(
                    self.tx.clone(),
                    connection_handle,
                    tracker.interval_ms,
                ));
            }
            if notify {
                self.callbacks.for_all_callbacks(|cb| {
                    cb.on_started(address, DistanceMeasurementMethod::ChannelSounding)
                });
            }
        }
    }

    fn fail_cs_setup(&mut self, connection_handle: u16) {
        let Some(mut tracker) = self.cs_trackers.remove(&connection_handle) else { return };
        if let Some(timer) = tracker.timer.take() {
            timer.abort();
        }
        if !tracker.waiting_for_start {
            return;
        }
        let address = tracker.address;
        self.callbacks.for_all_callbacks(|cb| {
            cb.on_start_fail(
                address,
                DistanceMeasurementError::InternalError,
                DistanceMeasurementMethod::ChannelSounding,
            )
        });
    }

    #[allow(clippy::too_many_arguments)]
    fn aggregate_subevent(
        &mut self,
        connection_handle: u16,
        procedure_counter: Option<u16>,
        frequency_compensation: Option<u16>,
        procedure_done_status: u8,
        abort_reason: u8,
        num_antenna_paths: u8,
        steps: &[ResultStep],
        local: bool,
    ) {
        let Some(tracker) = self.cs_trackers.get_mut(&connection_handle) else {
            warn!("subevent result for untracked connection {:#x}", connection_handle);
            return;
        };

        let Some(procedure) = (match procedure_counter {
            Some(counter) => Some(tracker.procedures.get_or_insert(counter, num_antenna_paths)),
            // A continuation belongs to the procedure opened by the last
            // full subevent result.
            None => tracker.procedures.latest_mut(),
        }) else {
            warn!("continuation with no open procedure on {:#x}", connection_handle);
            return;
        };

        let status = CsProcedureDoneStatus::from_raw(procedure_done_status);
        if local {
            procedure.local_status = status;
        } else {
            procedure.remote_status = status;
        }

        if abort_reason != 0 {
            procedure.aborted = true;
        } else {
            if let Some(compensation) = frequency_compensation {
                procedure.frequency_compensation.push(compensation);
            }
            // A remote event carries the peer's role data.
            let side_is_initiator = (tracker.role == CsRole::Initiator) == local;
            for step in steps {
                parse_step(procedure, step, side_is_initiator);
            }
        }

        if procedure.is_finished() {
            let counter = procedure.counter;
            let ready = procedure.is_ready();
            let address = tracker.address;
            if ready {
                let data = tracker.procedures.find(counter).unwrap().clone();
                self.callbacks.for_all_callbacks(|cb| cb.on_procedure_data_ready(address, &data));
            }
            if let Some(tracker) = self.cs_trackers.get_mut(&connection_handle) {
                tracker.procedures.evict_older_than(counter);
            }
        }
    }

    fn address_of(&self, connection_handle: u16) -> Option<RawAddress> {
        self.acl.address_of(connection_handle)
    }
}

fn compute_distance_cm(tx_power: i8, rssi: i8) -> u32 {
    let exponent =
        f64::from(i32::from(tx_power) - i32::from(rssi) - RSSI_DROP_OFF_AT_1M_DB) / 20.0;
    (10f64.powf(exponent) * 100.0).round() as u32
}

/// Sign-extends a 12-bit I/Q sample and normalizes it into [-1, 1).
fn iq_to_float(sample: u16) -> f64 {
    let masked = sample & 0x0fff;
    let signed = if masked & 0x0800 != 0 { (masked | 0xf000) as i16 } else { masked as i16 };
    f64::from(signed) / 2048.0
}

fn parse_step(procedure: &mut CsProcedureData, step: &ResultStep, side_is_initiator: bool) {
    match step.mode {
        0 => {
            if side_is_initiator {
                let Some(data) = btle_hci::CsMode0InitiatorData::from_bytes(&step.data) else {
                    warn!("malformed mode 0 initiator step");
                    return;
                };
                procedure.measured_freq_offsets.push(data.measured_freq_offset);
            } else if btle_hci::CsMode0ReflectorData::from_bytes(&step.data).is_none() {
                warn!("malformed mode 0 reflector step");
            }
        }
        2 => {
            let num_paths = procedure.num_antenna_paths as usize;
            let Some(data) = btle_hci::CsMode2Data::from_bytes(&step.data, procedure.num_antenna_paths)
            else {
                warn!("malformed mode 2 step");
                return;
            };
            let permutation_index = data.antenna_permutation_index as usize;
            if permutation_index >= CS_ANTENNA_PERMUTATION.len() {
                warn!("invalid antenna permutation index {}", permutation_index);
                return;
            }
            if side_is_initiator {
                procedure.step_channels.push(step.channel);
            }
            for (k, tone) in data.tone_data.iter().enumerate() {
                // The last delivered tone is the extension slot; the rest
                // are unpermuted through the table.
                let path = if k == num_paths {
                    num_paths
                } else {
                    usize::from(CS_ANTENNA_PERMUTATION[permutation_index][k] - 1)
                };
                let iq = (iq_to_float(tone.i_sample), iq_to_float(tone.q_sample));
                if side_is_initiator {
                    procedure.tone_pct_initiator[path].push(iq);
                    procedure.tone_quality_initiator[path].push(tone.quality);
                } else {
                    procedure.tone_pct_reflector[path].push(iq);
                    procedure.tone_quality_reflector[path].push(tone.quality);
                }
            }
        }
        1 | 3 => {
            info!("unsupported CS step mode {}", step.mode);
        }
        mode => {
            warn!("invalid CS step mode {}", mode);
        }
    }
}

fn spawn_rssi_timer(tx: Sender<Message>, address: RawAddress, interval_ms: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
        loop {
            interval.tick().await;
            if tx
                .send(Message::DistanceMeasurement(DistanceActions::ReadRssi { address }))
                .await
                .is_err()
            {
                break;
            }
        }
    })
}

fn spawn_cs_timer(tx: Sender<Message>, connection_handle: u16, interval_ms: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
        loop {
            interval.tick().await;
            if tx
                .send(Message::DistanceMeasurement(DistanceActions::EnableCsProcedure {
                    connection_handle,
                }))
                .await
                .is_err()
            {
                break;
            }
        }
    })
}
