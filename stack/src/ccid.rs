//! Keeps track of content control ids assigned per audio context type.

use std::collections::HashMap;

use itertools::Itertools;
use log::warn;

use crate::ltv::{AudioContexts, LeAudioContextType};

#[derive(Default)]
pub struct ContentControlIdKeeper {
    ccids: HashMap<LeAudioContextType, u8>,
}

impl ContentControlIdKeeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns a ccid to every context in the set. An empty context set
    /// removes the ccid from all contexts it was assigned to. RFU contexts
    /// are rejected.
    pub fn set_ccid(&mut self, contexts: AudioContexts, ccid: u8) {
        if contexts.contains(LeAudioContextType::Rfu) {
            warn!("refusing to assign ccid {} to an RFU context", ccid);
            return;
        }

        if !contexts.any() {
            self.ccids.retain(|_, c| *c != ccid);
            return;
        }

        for context in contexts.iter() {
            self.ccids.insert(context, ccid);
        }
    }

    pub fn get_ccid(&self, context: LeAudioContextType) -> Option<u8> {
        self.ccids.get(&context).copied()
    }

    /// Returns the deduplicated ccids assigned to any context in the set.
    pub fn get_all_ccids(&self, contexts: AudioContexts) -> Vec<u8> {
        contexts
            .iter()
            .filter_map(|context| self.get_ccid(context))
            .sorted()
            .dedup()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let mut keeper = ContentControlIdKeeper::new();
        let mut contexts = AudioContexts::none();
        contexts.add(LeAudioContextType::Media);
        contexts.add(LeAudioContextType::Game);
        keeper.set_ccid(contexts, 3);

        assert_eq!(keeper.get_ccid(LeAudioContextType::Media), Some(3));
        assert_eq!(keeper.get_ccid(LeAudioContextType::Game), Some(3));
        assert_eq!(keeper.get_ccid(LeAudioContextType::Live), None);
    }

    #[test]
    fn test_rfu_rejected() {
        let mut keeper = ContentControlIdKeeper::new();
        let mut contexts = AudioContexts::none();
        contexts.add(LeAudioContextType::Rfu);
        contexts.add(LeAudioContextType::Media);
        keeper.set_ccid(contexts, 3);

        assert_eq!(keeper.get_ccid(LeAudioContextType::Media), None);
    }

    #[test]
    fn test_empty_contexts_removes() {
        let mut keeper = ContentControlIdKeeper::new();
        keeper.set_ccid(LeAudioContextType::Media.into(), 3);
        keeper.set_ccid(LeAudioContextType::Live.into(), 4);

        keeper.set_ccid(AudioContexts::none(), 3);
        assert_eq!(keeper.get_ccid(LeAudioContextType::Media), None);
        assert_eq!(keeper.get_ccid(LeAudioContextType::Live), Some(4));
    }

    #[test]
    fn test_get_all_ccids_dedups() {
        let mut keeper = ContentControlIdKeeper::new();
        let mut contexts = AudioContexts::none();
        contexts.add(LeAudioContextType::Media);
        contexts.add(LeAudioContextType::Game);
        keeper.set_ccid(contexts, 3);
        keeper.set_ccid(LeAudioContextType::Live.into(), 4);

        let mut all = AudioContexts::none();
        all.add(LeAudioContextType::Media);
        all.add(LeAudioContextType::Game);
        all.add(LeAudioContextType::Live);
        all.add(LeAudioContextType::Alerts);
        assert_eq!(keeper.get_all_ccids(all), vec![3, 4]);
    }
}
