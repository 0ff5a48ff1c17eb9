//! Per-broadcast lifecycle state machine: announcement advertising, BIG
//! creation and teardown, ISO data path sequencing.

use log::{info, warn};
use num_derive::{FromPrimitive, ToPrimitive};

use btle_hci::{LeCreateBig, LeCreateBigComplete, LeSetupIsoDataPath, LeTerminateBigComplete, Status};

use crate::broadcast_config::{
    prepare_advertising_data, prepare_periodic_data, BasicAudioAnnouncementData,
    BroadcastConfiguration, PublicBroadcastAnnouncementData,
};
use crate::RawAddress;

pub const MAX_BIS_PER_BIG: u8 = 31;

const ADV_INTERVAL_MIN: u16 = 0x00a0;
const ADV_INTERVAL_MAX: u16 = 0x0140;
const ADV_TX_POWER_DBM: i8 = 8;
const PERIODIC_INTERVAL_MIN: u16 = 0x0140;
const PERIODIC_INTERVAL_MAX: u16 = 0x0168;
const PRIMARY_PHY_1M: u8 = 0x01;

/// Local host terminated connection.
const BIG_TERMINATE_REASON: u8 = 0x16;

/// Remove data path direction bit: host to controller.
const DATA_PATH_INPUT_BIT: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum BroadcastState {
    Stopped = 0,
    Configuring = 1,
    Configured = 2,
    Stopping = 3,
    Streaming = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastMsg {
    Start,
    Suspend,
    Stop,
}

/// Parameters of the announcement advertising set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisingParams {
    pub min_interval: u16,
    pub max_interval: u16,
    pub tx_power_dbm: i8,
    pub primary_phy: u8,
    pub secondary_phy: u8,
    pub periodic_min_interval: u16,
    pub periodic_max_interval: u16,
    pub include_tx_power: bool,
}

/// Announcement advertising surface.
pub trait Advertiser: Send {
    fn create_announcement(
        &mut self,
        broadcast_id: u32,
        params: AdvertisingParams,
        advertising_data: Vec<u8>,
        periodic_data: Vec<u8>,
    );
    fn enable_announcement(&mut self, broadcast_id: u32, enable: bool);
    fn update_announcement(
        &mut self,
        broadcast_id: u32,
        advertising_data: Vec<u8>,
        periodic_data: Vec<u8>,
    );
    fn destroy_announcement(&mut self, broadcast_id: u32);
    fn read_own_address(&mut self, broadcast_id: u32);
}

/// ISO transport surface.
pub trait IsoManager: Send {
    fn create_big(&mut self, command: LeCreateBig);
    fn terminate_big(&mut self, big_handle: u8, reason: u8);
    fn setup_iso_data_path(&mut self, command: LeSetupIsoDataPath);
    fn remove_iso_data_path(&mut self, connection_handle: u16, direction_mask: u8);
    fn send_iso_data(&mut self, connection_handle: u16, data: &[u8]);
}

/// Immutable per-broadcast configuration.
#[derive(Debug, Clone)]
pub struct BroadcastStateMachineConfig {
    pub broadcast_id: u32,
    pub is_public: bool,
    pub broadcast_name: String,
    pub streaming_phy: u8,
    pub config: BroadcastConfiguration,
    pub announcement: BasicAudioAnnouncementData,
    pub public_announcement: Option<PublicBroadcastAnnouncementData>,
    pub broadcast_code: Option<[u8; 16]>,
}

/// BIG parameters reported by the controller.
#[derive(Debug, Clone)]
pub struct BigConfig {
    pub big_sync_delay: u32,
    pub transport_latency_big: u32,
    pub phy: u8,
    pub max_pdu: u16,
    pub iso_interval: u16,
    pub connection_handles: Vec<u16>,
}

/// Events reported to the owning broadcaster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastSmEvent {
    CreateStatus { success: bool },
    StateChanged(BroadcastState),
    BigCreated { connection_handles: Vec<u16> },
    Destroyed,
}

pub struct BroadcastStateMachine {
    cfg: BroadcastStateMachineConfig,
    state: BroadcastState,
    advertising_sid: Option<u8>,
    own_address: Option<RawAddress>,
    big_config: Option<BigConfig>,
    suspending: bool,
    paths_configured: usize,
    paths_torn_down: usize,
}

impl BroadcastStateMachine {
    pub fn new(cfg: BroadcastStateMachineConfig) -> Self {
        Self {
            cfg,
            state: BroadcastState::Stopped,
            advertising_sid: None,
            own_address: None,
            big_config: None,
            suspending: false,
            paths_configured: 0,
            paths_torn_down: 0,
        }
    }

    pub fn state(&self) -> BroadcastState {
        self.state
    }

    pub fn broadcast_id(&self) -> u32 {
        self.cfg.broadcast_id
    }

    pub fn config(&self) -> &BroadcastStateMachineConfig {
        &self.cfg
    }

    pub fn advertising_sid(&self) -> Option<u8> {
        self.advertising_sid
    }

    pub fn own_address(&self) -> Option<RawAddress> {
        self.own_address
    }

    pub fn connection_handles(&self) -> &[u16] {
        self.big_config.as_ref().map(|b| b.connection_handles.as_slice()).unwrap_or(&[])
    }

    /// Validates the configuration and requests the announcement advertising
    /// set.
    pub fn initialize(&mut self, advertiser: &mut dyn Advertiser) -> Vec<BroadcastSmEvent> {
        let num_bis = self.cfg.config.num_bis_total();
        if num_bis == 0 || num_bis > MAX_BIS_PER_BIG {
            warn!("broadcast {}: invalid BIS count {}", self.cfg.broadcast_id, num_bis);
            return vec![BroadcastSmEvent::CreateStatus { success: false }];
        }

        let params = AdvertisingParams {
            min_interval: ADV_INTERVAL_MIN,
            max_interval: ADV_INTERVAL_MAX,
            tx_power_dbm: ADV_TX_POWER_DBM,
            primary_phy: PRIMARY_PHY_1M,
            secondary_phy: self.cfg.streaming_phy,
            periodic_min_interval: PERIODIC_INTERVAL_MIN,
            periodic_max_interval: PERIODIC_INTERVAL_MAX,
            include_tx_power: true,
        };
        advertiser.create_announcement(
            self.cfg.broadcast_id,
            params,
            self.advertising_data(),
            self.periodic_data(),
        );
        vec![]
    }

    fn advertising_data(&self) -> Vec<u8> {
        prepare_advertising_data(
            self.cfg.broadcast_id,
            &self.cfg.broadcast_name,
            self.cfg.public_announcement.as_ref().filter(|_| self.cfg.is_public),
        )
    }

    fn periodic_data(&self) -> Vec<u8> {
        prepare_periodic_data(&self.cfg.announcement)
    }

    /// The advertising SID is recorded even when creation failed, so a
    /// partially created set can still be destroyed by id.
    pub fn on_announcement_created(
        &mut self,
        success: bool,
        advertising_sid: u8,
        advertiser: &mut dyn Advertiser,
    ) -> Vec<BroadcastSmEvent> {
        self.advertising_sid = Some(advertising_sid);
        if !success {
            return vec![BroadcastSmEvent::CreateStatus { success: false }];
        }
        self.state = BroadcastState::Configured;
        advertiser.read_own_address(self.cfg.broadcast_id);
        vec![BroadcastSmEvent::CreateStatus { success: true }]
    }

    pub fn on_own_address_read(&mut self, address: RawAddress) {
        self.own_address = Some(address);
    }

    pub fn process_message(
        &mut self,
        msg: BroadcastMsg,
        advertiser: &mut dyn Advertiser,
        iso: &mut dyn IsoManager,
    ) -> Vec<BroadcastSmEvent> {
        match (msg, self.state) {
            (BroadcastMsg::Start, BroadcastState::Stopped) => {
                self.state = BroadcastState::Configuring;
                advertiser.enable_announcement(self.cfg.broadcast_id, true);
                vec![]
            }
            (BroadcastMsg::Start, BroadcastState::Configured) => {
                self.create_big(iso);
                vec![]
            }
            (BroadcastMsg::Start, BroadcastState::Stopping) => {
                warn!("broadcast {}: start requested while stopping", self.cfg.broadcast_id);
                vec![]
            }
            (BroadcastMsg::Start, _) => vec![],
            (BroadcastMsg::Stop, BroadcastState::Streaming) => {
                let teardown_in_flight = self.suspending;
                self.state = BroadcastState::Stopping;
                if !teardown_in_flight {
                    self.trigger_iso_teardown(iso);
                }
                vec![]
            }
            (BroadcastMsg::Stop, BroadcastState::Configured) => {
                self.state = BroadcastState::Stopping;
                advertiser.enable_announcement(self.cfg.broadcast_id, false);
                vec![]
            }
            (BroadcastMsg::Stop, _) => vec![],
            (BroadcastMsg::Suspend, BroadcastState::Streaming) => {
                self.suspending = true;
                self.trigger_iso_teardown(iso);
                vec![]
            }
            (BroadcastMsg::Suspend, _) => vec![],
        }
    }

    pub fn on_announcement_enabled(
        &mut self,
        enabled: bool,
        success: bool,
        advertiser: &mut dyn Advertiser,
        iso: &mut dyn IsoManager,
    ) -> Vec<BroadcastSmEvent> {
        match (enabled, success) {
            (true, true) => {
                self.state = BroadcastState::Configured;
                self.process_message(BroadcastMsg::Start, advertiser, iso)
            }
            (true, false) => {
                self.state = BroadcastState::Stopped;
                vec![BroadcastSmEvent::StateChanged(BroadcastState::Stopped)]
            }
            (false, true) => {
                self.state = BroadcastState::Stopped;
                vec![BroadcastSmEvent::StateChanged(BroadcastState::Stopped)]
            }
            (false, false) => {
                self.state = BroadcastState::Configured;
                vec![BroadcastSmEvent::StateChanged(BroadcastState::Configured)]
            }
        }
    }

    fn create_big(&mut self, iso: &mut dyn IsoManager) {
        let Some(sid) = self.advertising_sid else {
            warn!("broadcast {}: no advertising set to bind the BIG to", self.cfg.broadcast_id);
            return;
        };
        let config = &self.cfg.config;
        iso.create_big(LeCreateBig {
            big_handle: sid,
            advertising_handle: sid,
            num_bis: config.num_bis_total(),
            sdu_interval: config.sdu_interval_us,
            max_sdu: config.max_sdu_octets,
            max_transport_latency: config.qos.max_transport_latency_ms,
            rtn: config.qos.retransmission_number,
            phy: self.cfg.streaming_phy,
            packing: config.packing,
            framing: config.framing,
            encryption: self.cfg.broadcast_code.is_some() as u8,
            broadcast_code: self.cfg.broadcast_code.unwrap_or([0; 16]),
        });
    }

    pub fn on_create_big_complete(
        &mut self,
        event: LeCreateBigComplete,
        iso: &mut dyn IsoManager,
    ) -> Vec<BroadcastSmEvent> {
        if !event.status.is_success() {
            warn!(
                "broadcast {}: BIG creation failed with {:?}",
                self.cfg.broadcast_id, event.status
            );
            return vec![];
        }

        let connection_handles = event.connection_handles.clone();
        self.big_config = Some(BigConfig {
            big_sync_delay: event.big_sync_delay,
            transport_latency_big: event.transport_latency_big,
            phy: event.phy,
            max_pdu: event.max_pdu,
            iso_interval: event.iso_interval,
            connection_handles: event.connection_handles,
        });

        self.paths_configured = 0;
        if let Some(first) = self.connection_handles().first().copied() {
            self.setup_data_path(iso, first);
        }
        vec![BroadcastSmEvent::BigCreated { connection_handles }]
    }

    fn setup_data_path(&self, iso: &mut dyn IsoManager, connection_handle: u16) {
        let data_path = &self.cfg.config.data_path;
        iso.setup_iso_data_path(LeSetupIsoDataPath {
            connection_handle,
            data_path_direction: 0x00,
            data_path_id: data_path.data_path_id,
            codec_id: data_path.codec_id,
            controller_delay: data_path.controller_delay_us,
            codec_configuration: vec![],
        });
    }

    pub fn on_setup_iso_data_path_complete(
        &mut self,
        status: Status,
        iso: &mut dyn IsoManager,
    ) -> Vec<BroadcastSmEvent> {
        if !status.is_success() {
            warn!(
                "broadcast {}: data path setup failed with {:?}, terminating BIG",
                self.cfg.broadcast_id, status
            );
            self.suspending = true;
            if let Some(sid) = self.advertising_sid {
                iso.terminate_big(sid, BIG_TERMINATE_REASON);
            }
            return vec![];
        }

        self.paths_configured += 1;
        match self.connection_handles().get(self.paths_configured).copied() {
            Some(next) => {
                self.setup_data_path(iso, next);
                vec![]
            }
            None => {
                self.state = BroadcastState::Streaming;
                info!("broadcast {} streaming", self.cfg.broadcast_id);
                vec![BroadcastSmEvent::StateChanged(BroadcastState::Streaming)]
            }
        }
    }

    fn trigger_iso_teardown(&mut self, iso: &mut dyn IsoManager) {
        self.paths_torn_down = 0;
        if let Some(first) = self.connection_handles().first().copied() {
            iso.remove_iso_data_path(first, DATA_PATH_INPUT_BIT);
        }
    }

    pub fn on_remove_iso_data_path_complete(
        &mut self,
        status: Status,
        iso: &mut dyn IsoManager,
    ) -> Vec<BroadcastSmEvent> {
        if !status.is_success() {
            warn!(
                "broadcast {}: data path removal failed with {:?}",
                self.cfg.broadcast_id, status
            );
        }

        self.paths_torn_down += 1;
        match self.connection_handles().get(self.paths_torn_down).copied() {
            Some(next) => iso.remove_iso_data_path(next, DATA_PATH_INPUT_BIT),
            None => {
                if let Some(sid) = self.advertising_sid {
                    iso.terminate_big(sid, BIG_TERMINATE_REASON);
                }
            }
        }
        vec![]
    }

    pub fn on_terminate_big_complete(
        &mut self,
        _event: LeTerminateBigComplete,
        advertiser: &mut dyn Advertiser,
    ) -> Vec<BroadcastSmEvent> {
        self.big_config = None;
        self.state = BroadcastState::Configured;
        if self.suspending {
            self.suspending = false;
            vec![BroadcastSmEvent::StateChanged(BroadcastState::Configured)]
        } else {
            advertiser.enable_announcement(self.cfg.broadcast_id, false);
            vec![]
        }
    }

    /// Replaces the announcements and pushes the new payloads out, skipped
    /// when the serialized bytes did not change.
    pub fn update_announcement(
        &mut self,
        announcement: BasicAudioAnnouncementData,
        public_announcement: Option<PublicBroadcastAnnouncementData>,
        advertiser: &mut dyn Advertiser,
    ) -> bool {
        let old_advertising = self.advertising_data();
        let old_periodic = self.periodic_data();

        self.cfg.announcement = announcement;
        self.cfg.public_announcement = public_announcement;

        let advertising = self.advertising_data();
        let periodic = self.periodic_data();
        if advertising == old_advertising && periodic == old_periodic {
            return false;
        }

        advertiser.update_announcement(self.cfg.broadcast_id, advertising, periodic);
        true
    }

    /// Tears the broadcast down unconditionally.
    pub fn destroy(
        &mut self,
        advertiser: &mut dyn Advertiser,
        iso: &mut dyn IsoManager,
    ) -> Vec<BroadcastSmEvent> {
        if self.big_config.is_some() {
            if let Some(sid) = self.advertising_sid {
                iso.terminate_big(sid, BIG_TERMINATE_REASON);
            }
        }
        advertiser.destroy_announcement(self.cfg.broadcast_id);
        self.state = BroadcastState::Stopped;
        vec![BroadcastSmEvent::Destroyed]
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::broadcast_config::{build_basic_announcement, lc3_stereo_24_2_2};
    use crate::ltv::LtvMap;

    #[derive(Default)]
    pub(crate) struct FakeAdvertiser {
        pub created: Vec<u32>,
        pub enabled: Vec<(u32, bool)>,
        pub updated: Vec<u32>,
        pub destroyed: Vec<u32>,
        pub address_reads: Vec<u32>,
    }

    impl Advertiser for FakeAdvertiser {
        fn create_announcement(
            &mut self,
            broadcast_id: u32,
            _params: AdvertisingParams,
            _advertising_data: Vec<u8>,
            _periodic_data: Vec<u8>,
        ) {
            self.created.push(broadcast_id);
        }

        fn enable_announcement(&mut self, broadcast_id: u32, enable: bool) {
            self.enabled.push((broadcast_id, enable));
        }

        fn update_announcement(
            &mut self,
            broadcast_id: u32,
            _advertising_data: Vec<u8>,
            _periodic_data: Vec<u8>,
        ) {
            self.updated.push(broadcast_id);
        }

        fn destroy_announcement(&mut self, broadcast_id: u32) {
            self.destroyed.push(broadcast_id);
        }

        fn read_own_address(&mut self, broadcast_id: u32) {
            self.address_reads.push(broadcast_id);
        }
    }

    #[derive(Default)]
    pub(crate) struct FakeIso {
        pub created_bigs: Vec<LeCreateBig>,
        pub terminated: Vec<(u8, u8)>,
        pub paths_set_up: Vec<u16>,
        pub paths_removed: Vec<u16>,
        pub iso_data: Vec<(u16, Vec<u8>)>,
    }

    impl IsoManager for FakeIso {
        fn create_big(&mut self, command: LeCreateBig) {
            self.created_bigs.push(command);
        }

        fn terminate_big(&mut self, big_handle: u8, reason: u8) {
            self.terminated.push((big_handle, reason));
        }

        fn setup_iso_data_path(&mut self, command: LeSetupIsoDataPath) {
            self.paths_set_up.push(command.connection_handle);
        }

        fn remove_iso_data_path(&mut self, connection_handle: u16, _direction_mask: u8) {
            self.paths_removed.push(connection_handle);
        }

        fn send_iso_data(&mut self, connection_handle: u16, data: &[u8]) {
            self.iso_data.push((connection_handle, data.to_vec()));
        }
    }

    pub(crate) fn test_sm_config(broadcast_id: u32) -> BroadcastStateMachineConfig {
        let config = lc3_stereo_24_2_2();
        let announcement = build_basic_announcement(&config, &[LtvMap::new()]);
        BroadcastStateMachineConfig {
            broadcast_id,
            is_public: false,
            broadcast_name: "test".to_string(),
            streaming_phy: 0x02,
            config,
            announcement,
            public_announcement: None,
            broadcast_code: None,
        }
    }

    fn big_complete(handles: Vec<u16>) -> LeCreateBigComplete {
        LeCreateBigComplete {
            status: Status::Success,
            big_handle: 1,
            big_sync_delay: 200,
            transport_latency_big: 100,
            phy: 0x02,
            nse: 3,
            bn: 1,
            pto: 0,
            irc: 3,
            max_pdu: 107,
            iso_interval: 8,
            connection_handles: handles,
        }
    }

    fn streaming_sm() -> (BroadcastStateMachine, FakeAdvertiser, FakeIso) {
        let mut sm = BroadcastStateMachine::new(test_sm_config(0x123456));
        let mut advertiser = FakeAdvertiser::default();
        let mut iso = FakeIso::default();

        sm.initialize(&mut advertiser);
        sm.on_announcement_created(true, 1, &mut advertiser);
        sm.process_message(BroadcastMsg::Start, &mut advertiser, &mut iso);
        sm.on_create_big_complete(big_complete(vec![0x60, 0x61]), &mut iso);
        sm.on_setup_iso_data_path_complete(Status::Success, &mut iso);
        let events = sm.on_setup_iso_data_path_complete(Status::Success, &mut iso);
        assert_eq!(events, vec![BroadcastSmEvent::StateChanged(BroadcastState::Streaming)]);
        (sm, advertiser, iso)
    }

    #[test]
    fn test_rejects_too_many_bis() {
        let mut cfg = test_sm_config(1);
        cfg.config.subgroups[0].num_bis = 32;
        let mut sm = BroadcastStateMachine::new(cfg);
        let mut advertiser = FakeAdvertiser::default();

        let events = sm.initialize(&mut advertiser);
        assert_eq!(events, vec![BroadcastSmEvent::CreateStatus { success: false }]);
        assert!(advertiser.created.is_empty());
    }

    #[test]
    fn test_create_flow() {
        let mut sm = BroadcastStateMachine::new(test_sm_config(0x123456));
        let mut advertiser = FakeAdvertiser::default();

        assert!(sm.initialize(&mut advertiser).is_empty());
        assert_eq!(advertiser.created, vec![0x123456]);

        let events = sm.on_announcement_created(true, 1, &mut advertiser);
        assert_eq!(events, vec![BroadcastSmEvent::CreateStatus { success: true }]);
        assert_eq!(sm.state(), BroadcastState::Configured);
        assert_eq!(advertiser.address_reads, vec![0x123456]);
        assert_eq!(sm.advertising_sid(), Some(1));
    }

    #[test]
    fn test_create_failure_keeps_sid() {
        let mut sm = BroadcastStateMachine::new(test_sm_config(1));
        let mut advertiser = FakeAdvertiser::default();

        sm.initialize(&mut advertiser);
        let events = sm.on_announcement_created(false, 7, &mut advertiser);
        assert_eq!(events, vec![BroadcastSmEvent::CreateStatus { success: false }]);
        assert_eq!(sm.advertising_sid(), Some(7));
        assert_eq!(sm.state(), BroadcastState::Stopped);
    }

    #[test]
    fn test_start_to_streaming() {
        let (sm, _advertiser, iso) = streaming_sm();
        assert_eq!(sm.state(), BroadcastState::Streaming);
        assert_eq!(iso.created_bigs.len(), 1);
        assert_eq!(iso.created_bigs[0].num_bis, 2);
        assert_eq!(iso.created_bigs[0].encryption, 0);
        assert_eq!(iso.paths_set_up, vec![0x60, 0x61]);
        assert_eq!(sm.connection_handles(), &[0x60, 0x61]);
    }

    #[test]
    fn test_start_from_stopped_enables_announcement() {
        let mut sm = BroadcastStateMachine::new(test_sm_config(1));
        let mut advertiser = FakeAdvertiser::default();
        let mut iso = FakeIso::default();

        sm.process_message(BroadcastMsg::Start, &mut advertiser, &mut iso);
        assert_eq!(sm.state(), BroadcastState::Configuring);
        assert_eq!(advertiser.enabled, vec![(1, true)]);

        // Enable success immediately retries the start.
        sm.advertising_sid = Some(1);
        sm.on_announcement_enabled(true, true, &mut advertiser, &mut iso);
        assert_eq!(iso.created_bigs.len(), 1);
    }

    #[test]
    fn test_stop_from_streaming() {
        let (mut sm, mut advertiser, mut iso) = streaming_sm();

        sm.process_message(BroadcastMsg::Stop, &mut advertiser, &mut iso);
        assert_eq!(sm.state(), BroadcastState::Stopping);
        assert_eq!(iso.paths_removed, vec![0x60]);

        sm.on_remove_iso_data_path_complete(Status::Success, &mut iso);
        assert_eq!(iso.paths_removed, vec![0x60, 0x61]);
        assert!(iso.terminated.is_empty());

        sm.on_remove_iso_data_path_complete(Status::Success, &mut iso);
        assert_eq!(iso.terminated, vec![(1, BIG_TERMINATE_REASON)]);

        let event = LeTerminateBigComplete { big_handle: 1, reason: BIG_TERMINATE_REASON };
        let events = sm.on_terminate_big_complete(event, &mut advertiser);
        assert!(events.is_empty());
        assert_eq!(advertiser.enabled.last(), Some(&(0x123456, false)));

        let events = sm.on_announcement_enabled(false, true, &mut advertiser, &mut iso);
        assert_eq!(events, vec![BroadcastSmEvent::StateChanged(BroadcastState::Stopped)]);
        assert_eq!(sm.state(), BroadcastState::Stopped);
    }

    #[test]
    fn test_suspend_keeps_announcement() {
        let (mut sm, mut advertiser, mut iso) = streaming_sm();
        let enables_before = advertiser.enabled.len();

        sm.process_message(BroadcastMsg::Suspend, &mut advertiser, &mut iso);
        sm.on_remove_iso_data_path_complete(Status::Success, &mut iso);
        sm.on_remove_iso_data_path_complete(Status::Success, &mut iso);

        let event = LeTerminateBigComplete { big_handle: 1, reason: BIG_TERMINATE_REASON };
        let events = sm.on_terminate_big_complete(event, &mut advertiser);
        assert_eq!(events, vec![BroadcastSmEvent::StateChanged(BroadcastState::Configured)]);
        assert_eq!(sm.state(), BroadcastState::Configured);
        assert_eq!(advertiser.enabled.len(), enables_before);
    }

    #[test]
    fn test_data_path_failure_terminates_big() {
        let mut sm = BroadcastStateMachine::new(test_sm_config(1));
        let mut advertiser = FakeAdvertiser::default();
        let mut iso = FakeIso::default();

        sm.initialize(&mut advertiser);
        sm.on_announcement_created(true, 1, &mut advertiser);
        sm.process_message(BroadcastMsg::Start, &mut advertiser, &mut iso);
        sm.on_create_big_complete(big_complete(vec![0x60, 0x61]), &mut iso);

        sm.on_setup_iso_data_path_complete(Status::CommandDisallowed, &mut iso);
        assert_eq!(iso.terminated, vec![(1, BIG_TERMINATE_REASON)]);
    }

    #[test]
    fn test_update_announcement_skips_unchanged() {
        let (mut sm, mut advertiser, _iso) = streaming_sm();

        let same = sm.cfg.announcement.clone();
        assert!(!sm.update_announcement(same, None, &mut advertiser));
        assert!(advertiser.updated.is_empty());

        let mut changed = sm.cfg.announcement.clone();
        changed.presentation_delay_us += 1;
        assert!(sm.update_announcement(changed, None, &mut advertiser));
        assert_eq!(advertiser.updated, vec![0x123456]);
    }

    #[test]
    fn test_destroy_streaming_terminates_first() {
        let (mut sm, mut advertiser, mut iso) = streaming_sm();

        let events = sm.destroy(&mut advertiser, &mut iso);
        assert_eq!(events, vec![BroadcastSmEvent::Destroyed]);
        assert_eq!(iso.terminated, vec![(1, BIG_TERMINATE_REASON)]);
        assert_eq!(advertiser.destroyed, vec![0x123456]);
    }
}
