//! LE Audio broadcast orchestration: owns the broadcast state machines, the
//! broadcast id pool, the audio HAL coupling and the encoded stream fan-out.

use std::collections::{HashMap, HashSet};

use log::{info, warn};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc::Sender;

use btle_hci::{LeCreateBigComplete, LeTerminateBigComplete, Status};

use crate::broadcast_config::{
    build_basic_announcement, BroadcastConfiguration, PublicBroadcastAnnouncementData,
    BROADCAST_ID_MAX, FEATURE_ENCRYPTED, FEATURE_HIGH_QUALITY, FEATURE_STANDARD_QUALITY,
    INVALID_BROADCAST_ID,
};
use crate::broadcast_state_machine::{
    Advertiser, BroadcastMsg, BroadcastSmEvent, BroadcastState, BroadcastStateMachine,
    BroadcastStateMachineConfig, IsoManager,
};
use crate::callbacks::Callbacks;
use crate::ccid::ContentControlIdKeeper;
use crate::codec_manager::{BroadcastQuality, CodecLocation, CodecManager};
use crate::ltv::{metadata_types, AudioContexts, LeAudioContextType, LtvMap};
use crate::{Message, RawAddress};

/// Subgroup context priority for configuration selection.
const CONTEXT_PRIORITY: [LeAudioContextType; 8] = [
    LeAudioContextType::Live,
    LeAudioContextType::Game,
    LeAudioContextType::Media,
    LeAudioContextType::EmergencyAlarm,
    LeAudioContextType::Alerts,
    LeAudioContextType::Instructional,
    LeAudioContextType::Notifications,
    LeAudioContextType::SoundEffects,
];

/// Broadcaster callback surface.
pub trait IBroadcasterCallbacks: Send {
    fn on_broadcast_created(&mut self, broadcast_id: u32, success: bool);
    fn on_broadcast_destroyed(&mut self, broadcast_id: u32);
    fn on_broadcast_state_changed(&mut self, broadcast_id: u32, state: BroadcastState);
    fn on_broadcast_metadata_changed(&mut self, broadcast_id: u32);
}

/// Audio HAL session surface.
pub trait AudioHalClient: Send {
    /// Starts an audio session. Returns false when the session cannot be
    /// acquired.
    fn start(&mut self) -> bool;
    fn stop(&mut self);
    fn confirm_stream(&mut self);
    fn cancel_stream(&mut self);
}

/// Software LC3 encoder surface, one payload per BIS channel.
pub trait BroadcastEncoder: Send {
    fn reconfigure(&mut self, config: &BroadcastConfiguration);
    fn encode(&mut self, pcm: &[u8], num_channels: usize) -> Vec<Vec<u8>>;
}

/// Parameters of a broadcast creation request.
#[derive(Debug, Clone)]
pub struct BroadcastRequest {
    pub is_public: bool,
    pub broadcast_name: String,
    pub broadcast_code: Option<[u8; 16]>,
    pub public_metadata: LtvMap,
    pub subgroup_quality: Vec<BroadcastQuality>,
    pub subgroup_metadata: Vec<LtvMap>,
}

#[derive(Debug, Clone)]
pub struct BroadcasterConfig {
    pub streaming_phy: u8,
    /// Forces multiple context types into the announced metadata, used by
    /// qualification test setups only.
    pub pts_force_multiple_contexts_metadata: bool,
    pub pts_broadcast_preset: Option<String>,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            streaming_phy: 0x02,
            pts_force_multiple_contexts_metadata: false,
            pts_broadcast_preset: None,
        }
    }
}

/// Async results delivered back into the serialized dispatch context.
#[derive(Debug)]
pub enum BroadcasterActions {
    AnnouncementCreated { broadcast_id: u32, success: bool, advertising_sid: u8 },
    AnnouncementEnabled { broadcast_id: u32, enabled: bool, success: bool },
    OwnAddressRead { broadcast_id: u32, address: RawAddress },
    CreateBigComplete(LeCreateBigComplete),
    TerminateBigComplete(LeTerminateBigComplete),
    SetupIsoDataPathComplete { status: Status, connection_handle: u16 },
    RemoveIsoDataPathComplete { status: Status, connection_handle: u16 },
    IsoTrafficEvent { active: bool },
    AudioFrame(Vec<u8>),
}

pub struct LeAudioBroadcaster {
    callbacks: Callbacks<dyn IBroadcasterCallbacks + Send>,
    broadcasts: HashMap<u32, BroadcastStateMachine>,
    pending: Vec<BroadcastStateMachine>,
    broadcast_ids: Vec<u32>,
    rng: SmallRng,
    queued_create: Option<BroadcastRequest>,
    queued_start: Option<u32>,
    iso_traffic_active: bool,
    muted: HashSet<u32>,
    advertiser: Box<dyn Advertiser>,
    iso: Box<dyn IsoManager>,
    audio_hal: Box<dyn AudioHalClient>,
    encoder: Box<dyn BroadcastEncoder>,
    codec_manager: CodecManager,
    ccid_keeper: ContentControlIdKeeper,
    config: BroadcasterConfig,
}

impl LeAudioBroadcaster {
    pub fn new(
        tx: Sender<Message>,
        advertiser: Box<dyn Advertiser>,
        iso: Box<dyn IsoManager>,
        audio_hal: Box<dyn AudioHalClient>,
        encoder: Box<dyn BroadcastEncoder>,
        mut codec_manager: CodecManager,
        config: BroadcasterConfig,
    ) -> Self {
        codec_manager.set_test_preset(config.pts_broadcast_preset.clone());
        Self {
            callbacks: Callbacks::new(tx, Message::BroadcasterCallbackDisconnected),
            broadcasts: HashMap::new(),
            pending: vec![],
            broadcast_ids: vec![],
            rng: SmallRng::from_entropy(),
            queued_create: None,
            queued_start: None,
            iso_traffic_active: false,
            muted: HashSet::new(),
            advertiser,
            iso,
            audio_hal,
            encoder,
            codec_manager,
            ccid_keeper: ContentControlIdKeeper::new(),
            config,
        }
    }

    pub fn register_callback(&mut self, callback: Box<dyn IBroadcasterCallbacks + Send>) -> u32 {
        self.callbacks.add_callback(callback)
    }

    pub fn unregister_callback(&mut self, callback_id: u32) -> bool {
        self.callbacks.remove_callback(callback_id)
    }

    pub fn ccid_keeper_mut(&mut self) -> &mut ContentControlIdKeeper {
        &mut self.ccid_keeper
    }

    /// Refills the broadcast id pool, two ids per round. A random source
    /// that twice in a row yields no usable ids is broken.
    fn refill_broadcast_ids(&mut self) {
        let mut empty_rounds = 0;
        while self.broadcast_ids.is_empty() {
            let before = self.broadcast_ids.len();
            for _ in 0..2 {
                let id = self.rng.gen_range(1..=BROADCAST_ID_MAX);
                if self.broadcast_ids.contains(&id) || self.broadcasts.contains_key(&id) {
                    continue;
                }
                self.broadcast_ids.push(id);
            }
            if self.broadcast_ids.len() == before {
                empty_rounds += 1;
                assert!(empty_rounds < 2, "broadcast id random source is broken");
            }
        }
    }

    fn next_broadcast_id(&mut self) -> u32 {
        self.refill_broadcast_ids();
        self.broadcast_ids.pop().unwrap()
    }

    fn select_context(contexts: &AudioContexts) -> LeAudioContextType {
        CONTEXT_PRIORITY
            .iter()
            .copied()
            .find(|context| contexts.contains(*context))
            .unwrap_or(LeAudioContextType::Media)
    }

    /// Fills in missing streaming contexts and appends the assigned ccids.
    fn enrich_metadata(&self, subgroup_metadata: &[LtvMap]) -> Vec<LtvMap> {
        subgroup_metadata
            .iter()
            .map(|metadata| {
                let mut metadata = metadata.clone();
                if self.config.pts_force_multiple_contexts_metadata {
                    let mut contexts = metadata.streaming_audio_contexts().unwrap_or_default();
                    contexts.add(LeAudioContextType::Media);
                    contexts.add(LeAudioContextType::Unspecified);
                    metadata.insert_u16(metadata_types::STREAMING_AUDIO_CONTEXTS, contexts.0);
                }
                let contexts = match metadata.streaming_audio_contexts() {
                    Some(contexts) => contexts,
                    None => {
                        let contexts = AudioContexts::from(LeAudioContextType::Media);
                        metadata
                            .insert_u16(metadata_types::STREAMING_AUDIO_CONTEXTS, contexts.0);
                        contexts
                    }
                };
                let ccids = self.ccid_keeper.get_all_ccids(contexts);
                if !ccids.is_empty() {
                    metadata.insert(metadata_types::CCID_LIST, ccids);
                }
                metadata
            })
            .collect()
    }

    fn union_contexts(subgroup_metadata: &[LtvMap]) -> AudioContexts {
        let mut contexts = AudioContexts::none();
        for metadata in subgroup_metadata {
            if let Some(c) = metadata.streaming_audio_contexts() {
                contexts.add_all(c);
            }
        }
        contexts
    }

    pub fn create_broadcast(&mut self, request: BroadcastRequest) {
        if self.iso_traffic_active {
            if self.queued_create.is_some() {
                warn!("replacing a queued broadcast creation request");
            }
            self.queued_create = Some(request);
            return;
        }
        self.do_create_broadcast(request);
    }

    fn do_create_broadcast(&mut self, request: BroadcastRequest) {
        let metadata = self.enrich_metadata(&request.subgroup_metadata);
        let selected = Self::select_context(&Self::union_contexts(&metadata));
        let Some(config) = self
            .codec_manager
            .get_broadcast_config(&request.subgroup_quality, &AudioContexts::from(selected))
        else {
            warn!("no broadcast configuration available, failing creation");
            self.callbacks
                .for_all_callbacks(|cb| cb.on_broadcast_created(INVALID_BROADCAST_ID, false));
            return;
        };

        let mut features = 0u8;
        if request.broadcast_code.is_some() {
            features |= FEATURE_ENCRYPTED;
        }
        let high_requested = request.subgroup_quality.contains(&BroadcastQuality::High);
        // Quality bit reflects what is actually configured, not what was
        // asked for.
        if high_requested && config.sampling_rate_hz() >= 48000 {
            features |= FEATURE_HIGH_QUALITY;
        } else {
            features |= FEATURE_STANDARD_QUALITY;
        }

        let broadcast_id = self.next_broadcast_id();
        let announcement = build_basic_announcement(&config, &metadata);
        let public_announcement = request.is_public.then(|| PublicBroadcastAnnouncementData {
            features,
            metadata: request.public_metadata.clone(),
        });

        let mut sm = BroadcastStateMachine::new(BroadcastStateMachineConfig {
            broadcast_id,
            is_public: request.is_public,
            broadcast_name: request.broadcast_name.clone(),
            streaming_phy: self.config.streaming_phy,
            config,
            announcement,
            public_announcement,
            broadcast_code: request.broadcast_code,
        });

        info!("creating broadcast {:#08x}", broadcast_id);
        let events = sm.initialize(self.advertiser.as_mut());
        if events.contains(&BroadcastSmEvent::CreateStatus { success: false }) {
            self.process_sm_events(broadcast_id, events);
            return;
        }
        self.pending.push(sm);
    }

    pub fn start_broadcast(&mut self, broadcast_id: u32) {
        if !self.broadcasts.contains_key(&broadcast_id) {
            warn!("start requested for unknown broadcast {:#08x}", broadcast_id);
            return;
        }
        if self
            .broadcasts
            .iter()
            .any(|(id, sm)| *id != broadcast_id && sm.state() == BroadcastState::Streaming)
        {
            warn!("another broadcast is streaming, rejecting start of {:#08x}", broadcast_id);
            return;
        }
        if self.iso_traffic_active {
            if self.queued_start.is_some() {
                warn!("a start request is already queued, rejecting {:#08x}", broadcast_id);
                return;
            }
            self.queued_start = Some(broadcast_id);
            return;
        }

        let first_streamer =
            !self.broadcasts.values().any(|sm| sm.state() == BroadcastState::Streaming);
        if first_streamer {
            if self.codec_manager.codec_location() != CodecLocation::Adsp {
                let config = self.broadcasts[&broadcast_id].config().config.clone();
                self.encoder.reconfigure(&config);
            }
            if !self.audio_hal.start() {
                warn!("audio HAL session rejected, not starting {:#08x}", broadcast_id);
                return;
            }
        }

        self.muted.remove(&broadcast_id);
        let events = {
            let sm = self.broadcasts.get_mut(&broadcast_id).unwrap();
            sm.process_message(BroadcastMsg::Start, self.advertiser.as_mut(), self.iso.as_mut())
        };
        self.process_sm_events(broadcast_id, events);
    }

    /// Stops the broadcast. The HAL session goes down before the stream is
    /// muted, and only then is the state machine told to stop.
    pub fn stop_broadcast(&mut self, broadcast_id: u32) {
        if !self.broadcasts.contains_key(&broadcast_id) {
            warn!("stop requested for unknown broadcast {:#08x}", broadcast_id);
            return;
        }
        self.audio_hal.stop();
        self.muted.insert(broadcast_id);
        let events = {
            let sm = self.broadcasts.get_mut(&broadcast_id).unwrap();
            sm.process_message(BroadcastMsg::Stop, self.advertiser.as_mut(), self.iso.as_mut())
        };
        self.process_sm_events(broadcast_id, events);
    }

    pub fn pause_broadcast(&mut self, broadcast_id: u32) {
        if !self.broadcasts.contains_key(&broadcast_id) {
            warn!("pause requested for unknown broadcast {:#08x}", broadcast_id);
            return;
        }
        self.audio_hal.stop();
        self.muted.insert(broadcast_id);
        let events = {
            let sm = self.broadcasts.get_mut(&broadcast_id).unwrap();
            sm.process_message(BroadcastMsg::Suspend, self.advertiser.as_mut(), self.iso.as_mut())
        };
        self.process_sm_events(broadcast_id, events);
    }

    pub fn destroy_broadcast(&mut self, broadcast_id: u32) {
        let Some(mut sm) = self.broadcasts.remove(&broadcast_id) else {
            warn!("destroy requested for unknown broadcast {:#08x}", broadcast_id);
            return;
        };
        self.muted.remove(&broadcast_id);
        let events = sm.destroy(self.advertiser.as_mut(), self.iso.as_mut());
        self.process_sm_events(broadcast_id, events);
    }

    /// Replaces the announced metadata. The update is all-or-nothing: every
    /// subgroup entry must be valid or nothing changes.
    pub fn update_metadata(
        &mut self,
        broadcast_id: u32,
        public_metadata: LtvMap,
        subgroup_metadata: Vec<LtvMap>,
    ) -> bool {
        let Some(sm) = self.broadcasts.get(&broadcast_id) else {
            warn!("metadata update for unknown broadcast {:#08x}", broadcast_id);
            return false;
        };
        if subgroup_metadata.len() != sm.config().config.subgroups.len() {
            warn!(
                "metadata update for {:#08x} dropped: {} entries for {} subgroups",
                broadcast_id,
                subgroup_metadata.len(),
                sm.config().config.subgroups.len()
            );
            return false;
        }
        for metadata in &subgroup_metadata {
            let Some(contexts) = metadata.streaming_audio_contexts() else {
                warn!("metadata update for {:#08x} dropped: missing contexts", broadcast_id);
                return false;
            };
            if contexts.contains(LeAudioContextType::Rfu) {
                warn!("metadata update for {:#08x} dropped: RFU context", broadcast_id);
                return false;
            }
        }

        let metadata = self.enrich_metadata(&subgroup_metadata);
        let config = sm.config().config.clone();
        let announcement = build_basic_announcement(&config, &metadata);
        let public_announcement = sm.config().public_announcement.as_ref().map(|old| {
            PublicBroadcastAnnouncementData { features: old.features, metadata: public_metadata }
        });

        let sm = self.broadcasts.get_mut(&broadcast_id).unwrap();
        let changed =
            sm.update_announcement(announcement, public_announcement, self.advertiser.as_mut());
        if changed {
            self.callbacks.for_all_callbacks(|cb| cb.on_broadcast_metadata_changed(broadcast_id));
        }
        changed
    }

    pub fn get_own_address(&self, broadcast_id: u32) -> Option<RawAddress> {
        self.broadcasts.get(&broadcast_id).and_then(|sm| sm.own_address())
    }

    pub fn get_broadcast_state(&self, broadcast_id: u32) -> Option<BroadcastState> {
        self.broadcasts.get(&broadcast_id).map(|sm| sm.state())
    }

    pub fn handle_action(&mut self, action: BroadcasterActions) {
        match action {
            BroadcasterActions::AnnouncementCreated { broadcast_id, success, advertising_sid } => {
                let Some(pos) =
                    self.pending.iter().position(|sm| sm.broadcast_id() == broadcast_id)
                else {
                    warn!("announcement result for unknown broadcast {:#08x}", broadcast_id);
                    return;
                };
                let mut sm = self.pending.remove(pos);
                let events =
                    sm.on_announcement_created(success, advertising_sid, self.advertiser.as_mut());
                if success {
                    self.broadcasts.insert(broadcast_id, sm);
                }
                self.process_sm_events(broadcast_id, events);
            }
            BroadcasterActions::AnnouncementEnabled { broadcast_id, enabled, success } => {
                let events = {
                    let Some(sm) = self.broadcasts.get_mut(&broadcast_id) else { return };
                    sm.on_announcement_enabled(
                        enabled,
                        success,
                        self.advertiser.as_mut(),
                        self.iso.as_mut(),
                    )
                };
                self.process_sm_events(broadcast_id, events);
            }
            BroadcasterActions::OwnAddressRead { broadcast_id, address } => {
                if let Some(sm) = self.broadcasts.get_mut(&broadcast_id) {
                    sm.on_own_address_read(address);
                }
            }
            BroadcasterActions::CreateBigComplete(event) => {
                let Some(broadcast_id) = self.find_by_sid(event.big_handle) else { return };
                let events = {
                    let sm = self.broadcasts.get_mut(&broadcast_id).unwrap();
                    sm.on_create_big_complete(event, self.iso.as_mut())
                };
                self.process_sm_events(broadcast_id, events);
            }
            BroadcasterActions::TerminateBigComplete(event) => {
                let Some(broadcast_id) = self.find_by_sid(event.big_handle) else { return };
                let events = {
                    let sm = self.broadcasts.get_mut(&broadcast_id).unwrap();
                    sm.on_terminate_big_complete(event, self.advertiser.as_mut())
                };
                self.process_sm_events(broadcast_id, events);
            }
            BroadcasterActions::SetupIsoDataPathComplete { status, connection_handle } => {
                let Some(broadcast_id) = self.find_by_connection_handle(connection_handle) else {
                    return;
                };
                let events = {
                    let sm = self.broadcasts.get_mut(&broadcast_id).unwrap();
                    sm.on_setup_iso_data_path_complete(status, self.iso.as_mut())
                };
                self.process_sm_events(broadcast_id, events);
            }
            BroadcasterActions::RemoveIsoDataPathComplete { status, connection_handle } => {
                let Some(broadcast_id) = self.find_by_connection_handle(connection_handle) else {
                    return;
                };
                let events = {
                    let sm = self.broadcasts.get_mut(&broadcast_id).unwrap();
                    sm.on_remove_iso_data_path_complete(status, self.iso.as_mut())
                };
                self.process_sm_events(broadcast_id, events);
            }
            BroadcasterActions::IsoTrafficEvent { active } => {
                self.iso_traffic_active = active;
                if !active {
                    // Starts replay before creations.
                    if let Some(broadcast_id) = self.queued_start.take() {
                        self.start_broadcast(broadcast_id);
                    }
                    if let Some(request) = self.queued_create.take() {
                        self.do_create_broadcast(request);
                    }
                }
            }
            BroadcasterActions::AudioFrame(pcm) => self.on_audio_frame(&pcm),
        }
    }

    fn find_by_sid(&self, big_handle: u8) -> Option<u32> {
        self.broadcasts
            .iter()
            .find(|(_, sm)| sm.advertising_sid() == Some(big_handle))
            .map(|(id, _)| *id)
    }

    fn find_by_connection_handle(&self, connection_handle: u16) -> Option<u32> {
        self.broadcasts
            .iter()
            .find(|(_, sm)| sm.connection_handles().contains(&connection_handle))
            .map(|(id, _)| *id)
    }

    /// Encodes one PCM frame and fans the payloads out to every streaming,
    /// unmuted broadcast.
    fn on_audio_frame(&mut self, pcm: &[u8]) {
        let targets: Vec<u32> = self
            .broadcasts
            .iter()
            .filter(|(id, sm)| {
                sm.state() == BroadcastState::Streaming && !self.muted.contains(id)
            })
            .map(|(id, _)| *id)
            .collect();
        let Some(first) = targets.first() else { return };

        let num_channels = self.broadcasts[first].config().config.num_bis_total() as usize;
        let encoded = self.encoder.encode(pcm, num_channels);
        if encoded.is_empty() {
            return;
        }

        for broadcast_id in targets {
            let handles: Vec<u16> = self.broadcasts[&broadcast_id].connection_handles().to_vec();
            for (i, handle) in handles.into_iter().enumerate() {
                self.iso.send_iso_data(handle, &encoded[i % encoded.len()]);
            }
        }
    }

    fn process_sm_events(&mut self, broadcast_id: u32, events: Vec<BroadcastSmEvent>) {
        for event in events {
            match event {
                BroadcastSmEvent::CreateStatus { success } => {
                    // A failed creation never leaks the real id.
                    let reported = if success { broadcast_id } else { INVALID_BROADCAST_ID };
                    self.callbacks
                        .for_all_callbacks(|cb| cb.on_broadcast_created(reported, success));
                }
                BroadcastSmEvent::StateChanged(state) => {
                    if state == BroadcastState::Streaming {
                        self.audio_hal.confirm_stream();
                    }
                    // A stop request mutes first, so falling back to Stopped
                    // while unmuted means a start fell through.
                    if state == BroadcastState::Stopped && !self.muted.contains(&broadcast_id) {
                        self.audio_hal.cancel_stream();
                    }
                    self.callbacks
                        .for_all_callbacks(|cb| cb.on_broadcast_state_changed(broadcast_id, state));
                }
                BroadcastSmEvent::BigCreated { connection_handles } => {
                    if let Some(sm) = self.broadcasts.get(&broadcast_id) {
                        if let Some(offload) = self.codec_manager.update_broadcast_conn_handle(
                            &connection_handles,
                            &sm.config().config,
                        ) {
                            info!(
                                "broadcast {:#08x} offload stream map: {:?}",
                                broadcast_id, offload.stream_map
                            );
                        }
                    }
                }
                BroadcastSmEvent::Destroyed => {
                    self.callbacks.for_all_callbacks(|cb| cb.on_broadcast_destroyed(broadcast_id));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc::channel;

    use crate::broadcast_state_machine::tests::{FakeAdvertiser, FakeIso};

    #[derive(Clone, Default)]
    struct SharedAdvertiser(Arc<Mutex<FakeAdvertiser>>);

    impl Advertiser for SharedAdvertiser {
        fn create_announcement(
            &mut self,
            broadcast_id: u32,
            params: crate::broadcast_state_machine::AdvertisingParams,
            advertising_data: Vec<u8>,
            periodic_data: Vec<u8>,
        ) {
            self.0.lock().unwrap().create_announcement(
                broadcast_id,
                params,
                advertising_data,
                periodic_data,
            );
        }

        fn enable_announcement(&mut self, broadcast_id: u32, enable: bool) {
            self.0.lock().unwrap().enable_announcement(broadcast_id, enable);
        }

        fn update_announcement(
            &mut self,
            broadcast_id: u32,
            advertising_data: Vec<u8>,
            periodic_data: Vec<u8>,
        ) {
            self.0.lock().unwrap().update_announcement(
                broadcast_id,
                advertising_data,
                periodic_data,
            );
        }

        fn destroy_announcement(&mut self, broadcast_id: u32) {
            self.0.lock().unwrap().destroy_announcement(broadcast_id);
        }

        fn read_own_address(&mut self, broadcast_id: u32) {
            self.0.lock().unwrap().read_own_address(broadcast_id);
        }
    }

    #[derive(Clone, Default)]
    struct SharedIso(Arc<Mutex<FakeIso>>);

    impl IsoManager for SharedIso {
        fn create_big(&mut self, command: btle_hci::LeCreateBig) {
            self.0.lock().unwrap().create_big(command);
        }

        fn terminate_big(&mut self, big_handle: u8, reason: u8) {
            self.0.lock().unwrap().terminate_big(big_handle, reason);
        }

        fn setup_iso_data_path(&mut self, command: btle_hci::LeSetupIsoDataPath) {
            self.0.lock().unwrap().setup_iso_data_path(command);
        }

        fn remove_iso_data_path(&mut self, connection_handle: u16, direction_mask: u8) {
            self.0.lock().unwrap().remove_iso_data_path(connection_handle, direction_mask);
        }

        fn send_iso_data(&mut self, connection_handle: u16, data: &[u8]) {
            self.0.lock().unwrap().send_iso_data(connection_handle, data);
        }
    }

    #[derive(Default)]
    struct HalState {
        started: u32,
        stopped: u32,
        confirmed: u32,
        cancelled: u32,
        reject_start: bool,
    }

    #[derive(Clone, Default)]
    struct SharedHal(Arc<Mutex<HalState>>);

    impl AudioHalClient for SharedHal {
        fn start(&mut self) -> bool {
            let mut state = self.0.lock().unwrap();
            if state.reject_start {
                return false;
            }
            state.started += 1;
            true
        }

        fn stop(&mut self) {
            self.0.lock().unwrap().stopped += 1;
        }

        fn confirm_stream(&mut self) {
            self.0.lock().unwrap().confirmed += 1;
        }

        fn cancel_stream(&mut self) {
            self.0.lock().unwrap().cancelled += 1;
        }
    }

    #[derive(Clone, Default)]
    struct SharedEncoder(Arc<Mutex<u32>>);

    impl BroadcastEncoder for SharedEncoder {
        fn reconfigure(&mut self, _config: &BroadcastConfiguration) {
            *self.0.lock().unwrap() += 1;
        }

        fn encode(&mut self, _pcm: &[u8], num_channels: usize) -> Vec<Vec<u8>> {
            (0..num_channels).map(|i| vec![i as u8; 4]).collect()
        }
    }

    #[derive(Clone, Default)]
    struct SharedCallbacks(Arc<Mutex<Vec<(u32, String)>>>);

    impl IBroadcasterCallbacks for SharedCallbacks {
        fn on_broadcast_created(&mut self, broadcast_id: u32, success: bool) {
            self.0.lock().unwrap().push((broadcast_id, format!("created {}", success)));
        }

        fn on_broadcast_destroyed(&mut self, broadcast_id: u32) {
            self.0.lock().unwrap().push((broadcast_id, "destroyed".to_string()));
        }

        fn on_broadcast_state_changed(&mut self, broadcast_id: u32, state: BroadcastState) {
            self.0.lock().unwrap().push((broadcast_id, format!("state {:?}", state)));
        }

        fn on_broadcast_metadata_changed(&mut self, broadcast_id: u32) {
            self.0.lock().unwrap().push((broadcast_id, "metadata".to_string()));
        }
    }

    struct Fixture {
        broadcaster: LeAudioBroadcaster,
        advertiser: SharedAdvertiser,
        iso: SharedIso,
        hal: SharedHal,
        encoder: SharedEncoder,
        events: SharedCallbacks,
    }

    fn fixture() -> Fixture {
        fixture_with(CodecManager::new(CodecLocation::Host, vec![]))
    }

    fn fixture_with(codec_manager: CodecManager) -> Fixture {
        let _ = env_logger::builder().is_test(true).try_init();
        let (tx, _rx) = channel::<Message>(32);
        let advertiser = SharedAdvertiser::default();
        let iso = SharedIso::default();
        let hal = SharedHal::default();
        let encoder = SharedEncoder::default();
        let events = SharedCallbacks::default();

        let mut broadcaster = LeAudioBroadcaster::new(
            tx,
            Box::new(advertiser.clone()),
            Box::new(iso.clone()),
            Box::new(hal.clone()),
            Box::new(encoder.clone()),
            codec_manager,
            BroadcasterConfig::default(),
        );
        broadcaster.register_callback(Box::new(events.clone()));
        Fixture { broadcaster, advertiser, iso, hal, encoder, events }
    }

    fn media_request(name: &str) -> BroadcastRequest {
        let mut metadata = LtvMap::new();
        metadata.insert_u16(
            metadata_types::STREAMING_AUDIO_CONTEXTS,
            LeAudioContextType::Media as u16,
        );
        BroadcastRequest {
            is_public: true,
            broadcast_name: name.to_string(),
            broadcast_code: None,
            public_metadata: LtvMap::new(),
            subgroup_quality: vec![BroadcastQuality::High],
            subgroup_metadata: vec![metadata],
        }
    }

    /// Creates a broadcast and drives it to the configured state. Returns
    /// the broadcast id.
    fn configured_broadcast(f: &mut Fixture, name: &str, sid: u8) -> u32 {
        f.broadcaster.create_broadcast(media_request(name));
        let broadcast_id = *f.advertiser.0.lock().unwrap().created.last().unwrap();
        f.broadcaster.handle_action(BroadcasterActions::AnnouncementCreated {
            broadcast_id,
            success: true,
            advertising_sid: sid,
        });
        broadcast_id
    }

    fn streaming_broadcast(f: &mut Fixture, name: &str, sid: u8, handles: Vec<u16>) -> u32 {
        let broadcast_id = configured_broadcast(f, name, sid);
        f.broadcaster.start_broadcast(broadcast_id);

        let event = btle_hci::LeCreateBigComplete {
            status: Status::Success,
            big_handle: sid,
            big_sync_delay: 200,
            transport_latency_big: 100,
            phy: 0x02,
            nse: 3,
            bn: 1,
            pto: 0,
            irc: 3,
            max_pdu: 107,
            iso_interval: 8,
            connection_handles: handles.clone(),
        };
        f.broadcaster.handle_action(BroadcasterActions::CreateBigComplete(event));
        for handle in handles {
            f.broadcaster.handle_action(BroadcasterActions::SetupIsoDataPathComplete {
                status: Status::Success,
                connection_handle: handle,
            });
        }
        broadcast_id
    }

    #[tokio::test]
    async fn test_create_and_promote() {
        let mut f = fixture();
        let broadcast_id = configured_broadcast(&mut f, "one", 1);

        assert_eq!(
            f.broadcaster.get_broadcast_state(broadcast_id),
            Some(BroadcastState::Configured)
        );
        let events = f.events.0.lock().unwrap();
        assert!(events.contains(&(broadcast_id, "created true".to_string())));
    }

    #[tokio::test]
    async fn test_failed_creation_reports_invalid_id() {
        let mut f = fixture();
        f.broadcaster.create_broadcast(media_request("one"));
        let broadcast_id = *f.advertiser.0.lock().unwrap().created.last().unwrap();

        f.broadcaster.handle_action(BroadcasterActions::AnnouncementCreated {
            broadcast_id,
            success: false,
            advertising_sid: 1,
        });
        // The real id never reaches the caller on failure.
        let events = f.events.0.lock().unwrap();
        assert!(events.contains(&(INVALID_BROADCAST_ID, "created false".to_string())));
        assert!(!events.iter().any(|(id, _)| *id == broadcast_id));
        drop(events);
        assert_eq!(f.broadcaster.get_broadcast_state(broadcast_id), None);
    }

    #[tokio::test]
    async fn test_creation_without_offload_capability_fails() {
        let mut f = fixture_with(CodecManager::new(CodecLocation::Adsp, vec![]));
        f.broadcaster.create_broadcast(media_request("one"));

        assert!(f.advertiser.0.lock().unwrap().created.is_empty());
        let events = f.events.0.lock().unwrap();
        assert!(events.contains(&(INVALID_BROADCAST_ID, "created false".to_string())));
    }

    #[tokio::test]
    async fn test_queued_create_is_replaced() {
        let mut f = fixture();
        f.broadcaster.handle_action(BroadcasterActions::IsoTrafficEvent { active: true });

        f.broadcaster.create_broadcast(media_request("first"));
        f.broadcaster.create_broadcast(media_request("second"));
        assert!(f.advertiser.0.lock().unwrap().created.is_empty());

        f.broadcaster.handle_action(BroadcasterActions::IsoTrafficEvent { active: false });
        // Only the replacement request went through.
        assert_eq!(f.advertiser.0.lock().unwrap().created.len(), 1);
        assert_eq!(f.broadcaster.pending.len(), 1);
        assert_eq!(f.broadcaster.pending[0].config().broadcast_name, "second");
    }

    #[tokio::test]
    async fn test_queued_start_is_rejected() {
        let mut f = fixture();
        let id_one = configured_broadcast(&mut f, "one", 1);
        let id_two = configured_broadcast(&mut f, "two", 2);

        f.broadcaster.handle_action(BroadcasterActions::IsoTrafficEvent { active: true });
        f.broadcaster.start_broadcast(id_one);
        f.broadcaster.start_broadcast(id_two);
        assert_eq!(f.broadcaster.queued_start, Some(id_one));

        f.broadcaster.handle_action(BroadcasterActions::IsoTrafficEvent { active: false });
        assert_eq!(f.broadcaster.queued_start, None);
        // The queued start went to the first broadcast only.
        assert_eq!(f.iso.0.lock().unwrap().created_bigs.len(), 1);
        assert_eq!(f.iso.0.lock().unwrap().created_bigs[0].big_handle, 1);
    }

    #[tokio::test]
    async fn test_single_streaming_broadcast() {
        let mut f = fixture();
        let id_one = streaming_broadcast(&mut f, "one", 1, vec![0x60, 0x61]);
        let id_two = configured_broadcast(&mut f, "two", 2);

        assert_eq!(f.broadcaster.get_broadcast_state(id_one), Some(BroadcastState::Streaming));
        f.broadcaster.start_broadcast(id_two);
        assert_eq!(f.broadcaster.get_broadcast_state(id_two), Some(BroadcastState::Configured));
        assert_eq!(f.iso.0.lock().unwrap().created_bigs.len(), 1);
    }

    #[tokio::test]
    async fn test_first_streamer_reconfigures_encoder_and_starts_hal() {
        let mut f = fixture();
        streaming_broadcast(&mut f, "one", 1, vec![0x60, 0x61]);

        assert_eq!(*f.encoder.0.lock().unwrap(), 1);
        assert_eq!(f.hal.0.lock().unwrap().started, 1);
        assert_eq!(f.hal.0.lock().unwrap().confirmed, 1);
    }

    #[tokio::test]
    async fn test_hal_rejection_rolls_back_start() {
        let mut f = fixture();
        let broadcast_id = configured_broadcast(&mut f, "one", 1);
        f.hal.0.lock().unwrap().reject_start = true;

        f.broadcaster.start_broadcast(broadcast_id);
        assert!(f.iso.0.lock().unwrap().created_bigs.is_empty());
        assert_eq!(
            f.broadcaster.get_broadcast_state(broadcast_id),
            Some(BroadcastState::Configured)
        );
    }

    #[tokio::test]
    async fn test_failed_restart_cancels_stream_request() {
        let mut f = fixture();
        let broadcast_id = configured_broadcast(&mut f, "one", 1);
        f.broadcaster.stop_broadcast(broadcast_id);
        f.broadcaster.handle_action(BroadcasterActions::AnnouncementEnabled {
            broadcast_id,
            enabled: false,
            success: true,
        });
        assert_eq!(f.broadcaster.get_broadcast_state(broadcast_id), Some(BroadcastState::Stopped));

        // Restarting re-enables the announcement; a failed enable drops the
        // pending HAL stream request.
        f.broadcaster.start_broadcast(broadcast_id);
        f.broadcaster.handle_action(BroadcasterActions::AnnouncementEnabled {
            broadcast_id,
            enabled: true,
            success: false,
        });
        assert_eq!(f.hal.0.lock().unwrap().cancelled, 1);
        assert_eq!(f.broadcaster.get_broadcast_state(broadcast_id), Some(BroadcastState::Stopped));
    }

    #[tokio::test]
    async fn test_pause_stops_hal_before_muting() {
        let mut f = fixture();
        let broadcast_id = streaming_broadcast(&mut f, "one", 1, vec![0x60, 0x61]);

        f.broadcaster.pause_broadcast(broadcast_id);
        assert_eq!(f.hal.0.lock().unwrap().stopped, 1);
        assert!(f.broadcaster.muted.contains(&broadcast_id));
    }

    #[tokio::test]
    async fn test_stop_order_hal_then_mute() {
        let mut f = fixture();
        let broadcast_id = streaming_broadcast(&mut f, "one", 1, vec![0x60, 0x61]);

        f.broadcaster.stop_broadcast(broadcast_id);
        assert_eq!(f.hal.0.lock().unwrap().stopped, 1);
        assert!(f.broadcaster.muted.contains(&broadcast_id));

        // A muted broadcast no longer receives audio.
        f.broadcaster.handle_action(BroadcasterActions::AudioFrame(vec![0; 8]));
        assert!(f.iso.0.lock().unwrap().iso_data.is_empty());
    }

    #[tokio::test]
    async fn test_audio_fanout() {
        let mut f = fixture();
        streaming_broadcast(&mut f, "one", 1, vec![0x60, 0x61]);

        f.broadcaster.handle_action(BroadcasterActions::AudioFrame(vec![0; 8]));
        let iso = f.iso.0.lock().unwrap();
        assert_eq!(iso.iso_data.len(), 2);
        assert_eq!(iso.iso_data[0], (0x60, vec![0; 4]));
        assert_eq!(iso.iso_data[1], (0x61, vec![1; 4]));
    }

    #[tokio::test]
    async fn test_metadata_update_is_atomic() {
        let mut f = fixture();
        let broadcast_id = configured_broadcast(&mut f, "one", 1);

        let mut valid = LtvMap::new();
        valid.insert_u16(
            metadata_types::STREAMING_AUDIO_CONTEXTS,
            LeAudioContextType::Media as u16,
        );
        // The second subgroup entry is missing its contexts, so nothing may
        // change.
        assert!(!f.broadcaster.update_metadata(
            broadcast_id,
            LtvMap::new(),
            vec![valid.clone(), LtvMap::new()],
        ));
        assert!(f.advertiser.0.lock().unwrap().updated.is_empty());
        assert!(!f.events.0.lock().unwrap().contains(&(broadcast_id, "metadata".to_string())));

        let mut changed = valid.clone();
        changed.insert_u16(
            metadata_types::STREAMING_AUDIO_CONTEXTS,
            LeAudioContextType::Live as u16,
        );
        assert!(f.broadcaster.update_metadata(broadcast_id, LtvMap::new(), vec![changed]));
        assert_eq!(f.advertiser.0.lock().unwrap().updated, vec![broadcast_id]);
        assert!(f.events.0.lock().unwrap().contains(&(broadcast_id, "metadata".to_string())));
    }

    #[tokio::test]
    async fn test_quality_downgrade_below_48k() {
        let mut f = fixture();
        // Media maps to a 24 kHz preset under software encoding, so the
        // requested high quality is announced as standard.
        let broadcast_id = configured_broadcast(&mut f, "one", 1);
        let sm = &f.broadcaster.broadcasts[&broadcast_id];
        let features = sm.config().public_announcement.as_ref().unwrap().features;
        assert_ne!(features & FEATURE_STANDARD_QUALITY, 0);
        assert_eq!(features & FEATURE_HIGH_QUALITY, 0);
    }

    #[tokio::test]
    async fn test_destroy_notifies() {
        let mut f = fixture();
        let broadcast_id = streaming_broadcast(&mut f, "one", 1, vec![0x60, 0x61]);

        f.broadcaster.destroy_broadcast(broadcast_id);
        assert!(f.broadcaster.broadcasts.is_empty());
        assert_eq!(f.advertiser.0.lock().unwrap().destroyed, vec![broadcast_id]);
        assert!(f
            .events
            .0
            .lock()
            .unwrap()
            .contains(&(broadcast_id, "destroyed".to_string())));
    }

    #[tokio::test]
    async fn test_broadcast_id_pool_unique() {
        let mut f = fixture();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..32 {
            let id = f.broadcaster.next_broadcast_id();
            assert!(id != 0 && id <= BROADCAST_ID_MAX);
            assert!(seen.insert(id));
            // Simulate the id staying in use.
            f.broadcaster
                .broadcasts
                .insert(id, BroadcastStateMachine::new(
                    crate::broadcast_state_machine::tests::test_sm_config(id),
                ));
        }
    }
}
