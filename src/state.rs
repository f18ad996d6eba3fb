//! Offline-stage secret stores for each role.
//!
//! Every store supports a "simulated" mode that skips the offline stage
//! entirely and returns one fixed identity secret for every query, so the
//! online stage can be exercised standalone during experimentation.

use std::collections::HashMap;

use crate::types::{IncrementalShare, Preshare, Tag, PRESHARE_SIZE};

/// The query-issuing client's append-only offline secret log plus a FIFO
/// read cursor for consuming them in the online stage.
pub struct ClientState {
    simulated: bool,
    read_idx: usize,
    tags: Vec<Tag>,
    incrementals: Vec<Vec<IncrementalShare>>,
    preshares: Vec<Preshare>,
}

impl ClientState {
    pub fn new() -> Self {
        ClientState {
            simulated: false,
            read_idx: 0,
            tags: Vec::new(),
            incrementals: Vec::new(),
            preshares: Vec::new(),
        }
    }

    pub fn initialize(&mut self, party_count: usize, secrets: usize, simulated: bool) {
        self.simulated = simulated;
        self.read_idx = 0;
        self.tags = Vec::new();
        self.incrementals = Vec::new();
        self.preshares = Vec::new();

        if simulated {
            self.tags.push(0);
            self.incrementals
                .push(vec![IncrementalShare { x: 0, y: 1 }; party_count]);
            self.preshares.push([0u8; PRESHARE_SIZE]);
        } else {
            self.tags.reserve(secrets);
            self.incrementals.reserve(secrets);
            self.preshares.reserve(secrets);
        }
    }

    pub fn add_secret(
        &mut self,
        tag: Tag,
        incrementals: Vec<IncrementalShare>,
        preshare: Preshare,
    ) {
        self.tags.push(tag);
        self.incrementals.push(incrementals);
        self.preshares.push(preshare);
    }

    pub fn load_next(&mut self) {
        self.read_idx += 1;
    }

    pub fn tag(&self) -> Tag {
        if self.simulated {
            self.tags[0]
        } else {
            self.tags[self.read_idx - 1]
        }
    }

    pub fn incremental_shares(&self) -> &[IncrementalShare] {
        if self.simulated {
            &self.incrementals[0]
        } else {
            &self.incrementals[self.read_idx - 1]
        }
    }

    pub fn preshare(&self) -> &Preshare {
        if self.simulated {
            &self.preshares[0]
        } else {
            &self.preshares[self.read_idx - 1]
        }
    }

    /// Drops the query material once every query has been sent, keeping the
    /// preshares around so responses can still be reconstructed.
    pub fn finish_sharing(&mut self) {
        self.read_idx = 0;
        self.tags = Vec::new();
        self.incrementals = Vec::new();
    }
}

impl Default for ClientState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
struct PartySecret {
    next_tag: Tag,
    incremental: IncrementalShare,
    preshare: Preshare,
}

/// A relay party's tag-indexed offline secret store: one incremental share
/// and one additive preshare per installed query, plus the tag the next
/// party should see.
pub struct PartyState {
    simulated: bool,
    secrets: HashMap<Tag, PartySecret>,
    loaded: Option<Tag>,
}

impl PartyState {
    pub fn new() -> Self {
        PartyState {
            simulated: false,
            secrets: HashMap::new(),
            loaded: None,
        }
    }

    pub fn initialize(&mut self, simulated: bool) {
        self.simulated = simulated;
        self.secrets.clear();
        if simulated {
            self.secrets.insert(
                0,
                PartySecret {
                    next_tag: 0,
                    incremental: IncrementalShare { x: 0, y: 1 },
                    preshare: [0u8; PRESHARE_SIZE],
                },
            );
        }
    }

    pub fn store(&mut self, tag: Tag, next_tag: Tag, share: IncrementalShare, preshare: Preshare) {
        let previous = self.secrets.insert(
            tag,
            PartySecret {
                next_tag,
                incremental: share,
                preshare,
            },
        );
        assert!(previous.is_none(), "duplicate tag installed: {tag}");
    }

    pub fn load_secret(&mut self, tag: Tag) {
        self.loaded = Some(if self.simulated { 0 } else { tag });
    }

    fn loaded(&self) -> &PartySecret {
        let key = self.loaded.expect("load_secret not called");
        &self.secrets[&key]
    }

    pub fn next_tag(&self) -> Tag {
        self.loaded().next_tag
    }

    pub fn incremental(&self) -> IncrementalShare {
        self.loaded().incremental
    }

    pub fn preshare(&self, tag: Tag) -> &Preshare {
        let key = if self.simulated { 0 } else { tag };
        &self.secrets[&key].preshare
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Tag, Tag, IncrementalShare, &Preshare)> {
        self.secrets
            .iter()
            .map(|(tag, s)| (tag, s.next_tag, s.incremental, &s.preshare))
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }
}

impl Default for PartyState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
struct BackendSecret {
    incremental: IncrementalShare,
    preshare: Preshare,
}

/// Like `PartyState` but with no `next_tag` — the backend is the end of
/// the chain.
pub struct BackendState {
    simulated: bool,
    secrets: HashMap<Tag, BackendSecret>,
    loaded: Option<Tag>,
}

impl BackendState {
    pub fn new() -> Self {
        BackendState {
            simulated: false,
            secrets: HashMap::new(),
            loaded: None,
        }
    }

    pub fn initialize(&mut self, simulated: bool) {
        self.simulated = simulated;
        self.secrets.clear();
        if simulated {
            self.secrets.insert(
                0,
                BackendSecret {
                    incremental: IncrementalShare { x: 0, y: 1 },
                    preshare: [0u8; PRESHARE_SIZE],
                },
            );
        }
    }

    pub fn store(&mut self, tag: Tag, share: IncrementalShare, preshare: Preshare) {
        let previous = self.secrets.insert(
            tag,
            BackendSecret {
                incremental: share,
                preshare,
            },
        );
        assert!(previous.is_none(), "duplicate tag installed: {tag}");
    }

    pub fn load_secret(&mut self, tag: Tag) {
        self.loaded = Some(if self.simulated { 0 } else { tag });
    }

    fn loaded(&self) -> &BackendSecret {
        let key = self.loaded.expect("load_secret not called");
        &self.secrets[&key]
    }

    pub fn incremental(&self) -> IncrementalShare {
        self.loaded().incremental
    }

    pub fn preshare(&self) -> &Preshare {
        &self.loaded().preshare
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Tag, IncrementalShare, &Preshare)> {
        self.secrets
            .iter()
            .map(|(tag, s)| (tag, s.incremental, &s.preshare))
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }
}

impl Default for BackendState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_state_round_robins_through_secrets() {
        let mut state = ClientState::new();
        state.initialize(3, 2, false);
        state.add_secret(10, vec![IncrementalShare { x: 1, y: 2 }], [1u8; PRESHARE_SIZE]);
        state.add_secret(20, vec![IncrementalShare { x: 3, y: 4 }], [2u8; PRESHARE_SIZE]);

        state.load_next();
        assert_eq!(state.tag(), 10);
        state.load_next();
        assert_eq!(state.tag(), 20);
    }

    #[test]
    fn client_state_simulated_always_returns_identity() {
        let mut state = ClientState::new();
        state.initialize(3, 0, true);
        state.load_next();
        assert_eq!(state.tag(), 0);
        assert_eq!(state.incremental_shares().len(), 3);
        state.load_next();
        assert_eq!(state.tag(), 0);
    }

    #[test]
    fn party_state_stores_and_loads_by_tag() {
        let mut state = PartyState::new();
        state.initialize(false);
        state.store(5, 6, IncrementalShare { x: 1, y: 2 }, [9u8; PRESHARE_SIZE]);
        state.load_secret(5);
        assert_eq!(state.next_tag(), 6);
        assert_eq!(state.incremental(), IncrementalShare { x: 1, y: 2 });
        assert_eq!(state.preshare(5), &[9u8; PRESHARE_SIZE]);
    }

    #[test]
    #[should_panic]
    fn party_state_rejects_duplicate_tags() {
        let mut state = PartyState::new();
        state.initialize(false);
        state.store(5, 6, IncrementalShare { x: 1, y: 2 }, [0u8; PRESHARE_SIZE]);
        state.store(5, 7, IncrementalShare { x: 3, y: 4 }, [1u8; PRESHARE_SIZE]);
    }

    #[test]
    fn backend_state_round_trip() {
        let mut state = BackendState::new();
        state.initialize(false);
        state.store(1, IncrementalShare { x: 7, y: 8 }, [3u8; PRESHARE_SIZE]);
        state.load_secret(1);
        assert_eq!(state.incremental(), IncrementalShare { x: 7, y: 8 });
        assert_eq!(state.preshare(), &[3u8; PRESHARE_SIZE]);
    }
}
