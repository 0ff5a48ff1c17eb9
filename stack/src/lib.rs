//! LE Audio broadcast and distance measurement core.
//!
//! All component state is owned by a single dispatch loop: collaborators and
//! timers post [`Message`] values onto one mpsc channel, and every mutation
//! happens while handling a message. HCI packets enter as raw bytes and are
//! decoded with the `btle_hci` codec before being routed to the component
//! that understands them.

use std::fmt;
use std::sync::{Arc, Mutex};

use log::warn;
use tokio::sync::mpsc::Receiver;

pub mod audio_config;
pub mod broadcast_config;
pub mod broadcast_state_machine;
pub mod broadcaster;
pub mod callbacks;
pub mod ccid;
pub mod codec_manager;
pub mod distance_measurement;
pub mod ltv;

use broadcaster::{BroadcasterActions, LeAudioBroadcaster};
use distance_measurement::{DistanceActions, DistanceMeasurementManager};

/// Six-byte Bluetooth device address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RawAddress(pub [u8; 6]);

impl fmt::Display for RawAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

/// Messages dispatched on the single stack context.
#[derive(Debug)]
pub enum Message {
    Broadcaster(BroadcasterActions),
    BroadcasterCallbackDisconnected(u32),
    DistanceMeasurement(DistanceActions),
    DistanceMeasurementCallbackDisconnected(u32),
    /// A raw HCI event packet from the controller.
    HciEvent(Vec<u8>),
}

/// Runs the serialized dispatch loop until every sender is gone.
pub async fn dispatch(
    mut rx: Receiver<Message>,
    broadcaster: Arc<Mutex<Box<LeAudioBroadcaster>>>,
    distance: Arc<Mutex<Box<DistanceMeasurementManager>>>,
) {
    while let Some(message) = rx.recv().await {
        match message {
            Message::Broadcaster(action) => {
                broadcaster.lock().unwrap().handle_action(action);
            }
            Message::BroadcasterCallbackDisconnected(id) => {
                broadcaster.lock().unwrap().unregister_callback(id);
            }
            Message::DistanceMeasurement(action) => {
                distance.lock().unwrap().handle_action(action);
            }
            Message::DistanceMeasurementCallbackDisconnected(id) => {
                distance.lock().unwrap().unregister_callback(id);
            }
            Message::HciEvent(packet) => match btle_hci::Event::from_bytes(&packet) {
                Ok(event) => route_hci_event(&broadcaster, &distance, event),
                Err(code) => warn!("dropping unparseable HCI event {:?}", code),
            },
        }
    }
}

/// BIG and ISO data path completions go to the broadcaster, everything else
/// distance measurement understands goes there.
fn route_hci_event(
    broadcaster: &Arc<Mutex<Box<LeAudioBroadcaster>>>,
    distance: &Arc<Mutex<Box<DistanceMeasurementManager>>>,
    event: btle_hci::Event,
) {
    use btle_hci::{Event, ReturnParameters};

    let action = match &event {
        Event::LeCreateBigComplete(e) => Some(BroadcasterActions::CreateBigComplete(e.clone())),
        Event::LeTerminateBigComplete(e) => {
            Some(BroadcasterActions::TerminateBigComplete(e.clone()))
        }
        Event::CommandComplete(complete) => match &complete.return_parameters {
            ReturnParameters::LeSetupIsoDataPath(p) => {
                Some(BroadcasterActions::SetupIsoDataPathComplete {
                    status: p.status,
                    connection_handle: p.connection_handle,
                })
            }
            ReturnParameters::LeRemoveIsoDataPath(p) => {
                Some(BroadcasterActions::RemoveIsoDataPathComplete {
                    status: p.status,
                    connection_handle: p.connection_handle,
                })
            }
            _ => None,
        },
        _ => None,
    };

    match action {
        Some(action) => broadcaster.lock().unwrap().handle_action(action),
        None => distance.lock().unwrap().handle_event(event),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_display() {
        let address = RawAddress([0x00, 0x1b, 0xdc, 0x08, 0x32, 0x67]);
        assert_eq!(format!("{}", address), "00:1b:dc:08:32:67");
    }
}
