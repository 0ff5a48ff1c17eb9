//! Utility for tracking registered callbacks.

use std::collections::HashMap;
use tokio::sync::mpsc::Sender;

use crate::Message;

/// Holds callbacks registered against a service, keyed by an assigned id.
///
/// When a callback is removed, the owning dispatch loop is notified through
/// the message channel so that any state referencing the id can be cleaned up.
pub struct Callbacks<T: Send + ?Sized> {
    callbacks: HashMap<u32, Box<T>>,
    next_id: u32,
    tx: Sender<Message>,
    disconnected_message: fn(u32) -> Message,
}

impl<T: Send + ?Sized> Callbacks<T> {
    pub fn new(tx: Sender<Message>, disconnected_message: fn(u32) -> Message) -> Self {
        Self { callbacks: HashMap::new(), next_id: 1, tx, disconnected_message }
    }

    /// Stores a new callback and returns its assigned id.
    pub fn add_callback(&mut self, callback: Box<T>) -> u32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        self.callbacks.insert(id, callback);
        id
    }

    /// Removes the callback with the given id.
    ///
    /// Returns true if the callback was registered.
    pub fn remove_callback(&mut self, id: u32) -> bool {
        match self.callbacks.remove(&id) {
            Some(_) => {
                let tx = self.tx.clone();
                let message = (self.disconnected_message)(id);
                tokio::spawn(async move {
                    let _ = tx.send(message).await;
                });
                true
            }
            None => false,
        }
    }

    /// Applies a closure to all registered callbacks.
    pub fn for_all_callbacks<F: FnMut(&mut Box<T>)>(&mut self, mut f: F) {
        for callback in self.callbacks.values_mut() {
            f(callback);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::channel;

    trait TestCallback {
        fn poke(&mut self);
    }

    struct Counter {
        count: u32,
    }

    impl TestCallback for Counter {
        fn poke(&mut self) {
            self.count += 1;
        }
    }

    #[tokio::test]
    async fn test_add_remove() {
        let (tx, mut rx) = channel::<Message>(10);
        let mut callbacks: Callbacks<dyn TestCallback + Send> =
            Callbacks::new(tx, Message::BroadcasterCallbackDisconnected);

        let id = callbacks.add_callback(Box::new(Counter { count: 0 }));
        callbacks.for_all_callbacks(|c| c.poke());

        assert!(callbacks.remove_callback(id));
        assert!(!callbacks.remove_callback(id));

        let Some(Message::BroadcasterCallbackDisconnected(got)) = rx.recv().await else {
            panic!()
        };
        assert_eq!(got, id);
    }
}
