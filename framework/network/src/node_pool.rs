//! Node records and the fixed pool that holds them (§3, §4.6).

use openlcb_core::{Alias, EventId, EventState, NodeFlags, NodeId, RunState};
use openlcb_persistence::NodeParameters;

use crate::buffer::Handle;

/// One entry in a node's producer or consumer event list (§3).
#[derive(Debug, Clone, Copy)]
pub struct EventEntry {
    pub id: EventId,
    pub state: EventState,
}

/// A fixed-capacity, append-only sequence of events with one enumeration
/// cursor (§3 "an associated enumeration cursor", used while replying to
/// Identify-Events / Protocol-Support-Inquiry-triggered enumeration).
#[derive(Debug, Clone)]
pub struct EventList<const N: usize> {
    entries: [Option<EventEntry>; N],
    len: usize,
    cursor: usize,
}

impl<const N: usize> Default for EventList<N> {
    fn default() -> Self {
        Self {
            entries: [None; N],
            len: 0,
            cursor: 0,
        }
    }
}

impl<const N: usize> EventList<N> {
    /// Append an entry. Returns `false` if the list is already full.
    pub fn push(&mut self, id: EventId, state: EventState) -> bool {
        if self.len >= N {
            return false;
        }
        self.entries[self.len] = Some(EventEntry { id, state });
        self.len += 1;
        true
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &EventEntry> {
        self.entries[..self.len].iter().filter_map(|e| e.as_ref())
    }

    /// The entry the cursor currently points at, without moving it.
    pub fn current(&self) -> Option<&EventEntry> {
        self.entries.get(self.cursor).and_then(|e| e.as_ref())
    }

    /// Reset the enumeration cursor to the first entry, returning it.
    pub fn reset_cursor(&mut self) -> Option<&EventEntry> {
        self.cursor = 0;
        self.entries[0].as_ref()
    }

    /// Advance the enumeration cursor, returning the next entry or
    /// `None` once the list is exhausted.
    pub fn advance_cursor(&mut self) -> Option<&EventEntry> {
        self.cursor += 1;
        self.entries.get(self.cursor).and_then(|e| e.as_ref())
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }
}

/// Where a node is in re-announcing its full producer/consumer list in
/// response to Identify-Events-Global/Addressed (§4.10 Expansion:
/// "driven by the same re-enumerate mechanism the dispatcher already
/// exposes for Producer-Identified/Consumer-Identified announcements
/// during OpenLCB login"). Mirrors the producer-then-consumer ordering
/// `login::openlcb::step` walks once at login, but is re-armed any time
/// an Identify-Events message arrives post-login.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AnnounceStage {
    Idle,
    Producers,
    Consumers,
}

/// A node's state machine run record and its two event sequences, plus
/// an opaque `X` side-car for domain extensions (§3 "optional
/// `train_state` side-car, train profile only" — the Train Control
/// extension supplies its own `X`; a node with no extension uses `()`).
pub struct Node<'a, const PRODUCERS: usize, const CONSUMERS: usize, X = ()> {
    pub id: NodeId,
    pub alias: Alias,
    pub parameters: &'a NodeParameters<'a>,
    pub flags: NodeFlags,
    pub run_state: RunState,
    /// 48-bit LFSR state driving alias (re)generation (§4.3).
    pub seed: u64,
    pub timerticks: u32,
    pub producers: EventList<PRODUCERS>,
    pub consumers: EventList<CONSUMERS>,
    /// Held during datagram ACK latency; released on OK reply or a
    /// permanent rejection, kept across a temporary rejection for retry
    /// (§4.8).
    pub last_received_datagram: Option<Handle>,
    pub announce_stage: AnnounceStage,
    pub extension: X,
}

impl<'a, const PRODUCERS: usize, const CONSUMERS: usize, X: Default> Node<'a, PRODUCERS, CONSUMERS, X> {
    pub fn new(id: NodeId, parameters: &'a NodeParameters<'a>) -> Self {
        Self {
            id,
            alias: Alias::NONE,
            parameters,
            flags: NodeFlags::default(),
            run_state: RunState::Init,
            seed: id.as_raw(),
            timerticks: 0,
            producers: EventList::default(),
            consumers: EventList::default(),
            last_received_datagram: None,
            announce_stage: AnnounceStage::Idle,
            extension: X::default(),
        }
    }

    /// Reset alias-claim and login state for a re-login (§4.3 duplicate
    /// recovery, §4.6 `reset_state`): `alias := 0`, `permitted :=
    /// false`, `initialized := false`, `datagram_ack_sent := false`, any
    /// `last_received_datagram` is released by the caller before this
    /// returns it, and `run_state := GenerateSeed`.
    pub fn reset_for_relogin(&mut self) -> Option<Handle> {
        self.alias = Alias::NONE;
        self.flags.remove(
            NodeFlags::PERMITTED | NodeFlags::INITIALIZED | NodeFlags::DATAGRAM_ACK_SENT,
        );
        self.run_state = RunState::GenerateSeed;
        self.announce_stage = AnnounceStage::Idle;
        self.last_received_datagram.take()
    }
}

/// Fixed array of node records with `CURSORS` independent enumeration
/// cursors, keyed by a caller-chosen small index (§4.6 — CAN login uses
/// one, OpenLCB login another, the main dispatcher a third).
pub struct NodePool<'a, const CAP: usize, const PRODUCERS: usize, const CONSUMERS: usize, const CURSORS: usize, X = ()> {
    nodes: [Option<Node<'a, PRODUCERS, CONSUMERS, X>>; CAP],
    cursors: [Option<usize>; CURSORS],
}

impl<'a, const CAP: usize, const PRODUCERS: usize, const CONSUMERS: usize, const CURSORS: usize, X>
    NodePool<'a, CAP, PRODUCERS, CONSUMERS, CURSORS, X>
{
    pub fn new() -> Self {
        Self {
            nodes: core::array::from_fn(|_| None),
            cursors: [None; CURSORS],
        }
    }

    /// Insert a node into the first empty slot. Fails with
    /// `Error::NodePoolExhausted` when every slot is occupied.
    pub fn insert(&mut self, node: Node<'a, PRODUCERS, CONSUMERS, X>) -> Result<usize, openlcb_core::Error> {
        let index = self
            .nodes
            .iter()
            .position(|slot| slot.is_none())
            .ok_or(openlcb_core::Error::NodePoolExhausted)?;
        self.nodes[index] = Some(node);
        Ok(index)
    }

    pub fn get(&self, index: usize) -> Option<&Node<'a, PRODUCERS, CONSUMERS, X>> {
        self.nodes.get(index)?.as_ref()
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Node<'a, PRODUCERS, CONSUMERS, X>> {
        self.nodes.get_mut(index)?.as_mut()
    }

    pub fn find_by_alias(&self, alias: Alias) -> Option<usize> {
        self.nodes
            .iter()
            .position(|slot| matches!(slot, Some(n) if n.alias == alias))
    }

    pub fn find_by_node_id(&self, id: NodeId) -> Option<usize> {
        self.nodes
            .iter()
            .position(|slot| matches!(slot, Some(n) if n.id == id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node<'a, PRODUCERS, CONSUMERS, X>> {
        self.nodes.iter().filter_map(|n| n.as_ref())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Node<'a, PRODUCERS, CONSUMERS, X>> {
        self.nodes.iter_mut().filter_map(|n| n.as_mut())
    }

    /// Reset cursor `key` to the first occupied slot, returning its
    /// index.
    pub fn get_first(&mut self, key: usize) -> Option<usize> {
        let first = self.nodes.iter().position(|slot| slot.is_some())?;
        if let Some(cursor) = self.cursors.get_mut(key) {
            *cursor = Some(first);
        }
        Some(first)
    }

    /// Advance cursor `key` to the next occupied slot after its current
    /// position. Returns `None` once the cursor runs off the end, at
    /// which point the caller is expected to clear whatever it was
    /// iterating (§4.7 step 4).
    pub fn get_next(&mut self, key: usize) -> Option<usize> {
        let current = (*self.cursors.get(key)?)?;
        let next = (current + 1..CAP).find(|&i| self.nodes[i].is_some());
        if let Some(cursor) = self.cursors.get_mut(key) {
            *cursor = next;
        }
        next
    }

    pub fn cursor(&self, key: usize) -> Option<usize> {
        *self.cursors.get(key)?
    }

    /// Force every node back into re-login (§4.6 `reset_state`, used on
    /// gateway reconnect). Returns the datagram buffer handle released
    /// by each node, if any, so the caller can free it from the store.
    pub fn reset_state<F: FnMut(Handle)>(&mut self, mut on_release: F) {
        for node in self.iter_mut() {
            if let Some(handle) = node.reset_for_relogin() {
                on_release(handle);
            }
        }
    }
}

impl<'a, const CAP: usize, const PRODUCERS: usize, const CONSUMERS: usize, const CURSORS: usize, X> Default
    for NodePool<'a, CAP, PRODUCERS, CONSUMERS, CURSORS, X>
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use openlcb_persistence::{DeclaredSpace, Snip};

    const SNIP: Snip = Snip {
        version_mfg: 4,
        manufacturer: b"\0",
        model: b"\0",
        hardware_version: b"\0",
        software_version: b"\0",
        version_user: 2,
        user_name: b"\0",
        user_description: b"\0",
    };
    const SPACES: [DeclaredSpace; 0] = [];
    const PARAMS: NodeParameters = NodeParameters {
        snip: SNIP,
        cdi_xml: None,
        protocol_support: 0,
        declared_spaces: &SPACES,
    };

    #[test]
    fn event_list_enumeration_cursor() {
        let mut list: EventList<4> = EventList::default();
        list.push(EventId::from_raw(1), EventState::Valid);
        list.push(EventId::from_raw(2), EventState::Unknown);
        assert_eq!(list.reset_cursor().unwrap().id, EventId::from_raw(1));
        assert_eq!(list.advance_cursor().unwrap().id, EventId::from_raw(2));
        assert!(list.advance_cursor().is_none());
    }

    #[test]
    fn pool_insert_and_cursor_walk() {
        let mut pool: NodePool<2, 4, 4, 1> = NodePool::new();
        let a = Node::new(NodeId::from_raw(1), &PARAMS);
        let b = Node::new(NodeId::from_raw(2), &PARAMS);
        pool.insert(a).unwrap();
        pool.insert(b).unwrap();

        let first = pool.get_first(0).unwrap();
        assert_eq!(pool.get(first).unwrap().id, NodeId::from_raw(1));
        let next = pool.get_next(0).unwrap();
        assert_eq!(pool.get(next).unwrap().id, NodeId::from_raw(2));
        assert!(pool.get_next(0).is_none());
    }

    #[test]
    fn pool_exhaustion() {
        let mut pool: NodePool<1, 1, 1, 1> = NodePool::new();
        pool.insert(Node::new(NodeId::from_raw(1), &PARAMS)).unwrap();
        assert!(pool.insert(Node::new(NodeId::from_raw(2), &PARAMS)).is_err());
    }

    #[test]
    fn reset_for_relogin_clears_flags() {
        let mut node: Node<4, 4> = Node::new(NodeId::from_raw(1), &PARAMS);
        node.alias = Alias::new(0x123);
        node.flags.insert(NodeFlags::PERMITTED | NodeFlags::INITIALIZED);
        node.run_state = RunState::Run;
        node.reset_for_relogin();
        assert!(node.alias.is_none());
        assert!(!node.flags.contains(NodeFlags::PERMITTED));
        assert_eq!(node.run_state, RunState::GenerateSeed);
    }

    #[test]
    fn reset_state_releases_pending_datagram_handles() {
        let mut pool: NodePool<1, 1, 1, 1> = NodePool::new();
        let mut node = Node::new(NodeId::from_raw(1), &PARAMS);
        node.last_received_datagram = Some(crate::buffer::Handle::test_handle(0));
        pool.insert(node).unwrap();

        let mut released = 0;
        pool.reset_state(|_| released += 1);
        assert_eq!(released, 1);
    }
}
