//! Ten-step CAN alias-claim sequence, driven one step per invocation off
//! the 100 ms tick (§4.3).

use heapless::Vec;
use openlcb_core::{lfsr, AliasMap, Error, NodeFlags, RunState};

use crate::node_pool::Node;
use crate::result::StepResult;
use crate::wire::can::{CanId, FrameType, AMD_VARIABLE_FIELD, RID_VARIABLE_FIELD};

/// Ticks required inside `WaitQuietWindow` before the claim proceeds to
/// `LoadRid` (§4.3's "≥ 200 ms", driven by the 100 ms tick source).
pub const QUIET_WINDOW_TICKS: u32 = 2;

/// A frame this step wants transmitted.
#[derive(Debug, Clone)]
pub struct CanEmit {
    pub id: CanId,
    pub payload: Vec<u8, 8>,
}

impl CanEmit {
    fn control(frame_type: FrameType, variable_field: u16, source_alias: openlcb_core::Alias) -> Self {
        Self {
            id: CanId {
                frame_type,
                variable_field,
                source_alias,
            },
            payload: Vec::new(),
        }
    }
}

/// Increment a node's 100 ms tick counter; called from the platform's
/// periodic timer source (§5).
pub fn tick<const P: usize, const C: usize, X>(node: &mut Node<'_, P, C, X>) {
    node.timerticks = node.timerticks.saturating_add(1);
}

/// Advance `node`'s alias-claim sequence by one step.
///
/// `alias_map` receives the tentative registration made in
/// `GenerateAlias`; a full map is reported as [`Error::AliasMapExhausted`]
/// rather than silently dropping the claim, since without an entry
/// collision detection for this node degrades.
pub fn step<const P: usize, const C: usize, const N: usize, X>(
    node: &mut Node<'_, P, C, X>,
    alias_map: &mut AliasMap<N>,
) -> Result<(StepResult, Option<CanEmit>), Error> {
    match node.run_state {
        RunState::Init => {
            node.seed = node.id.as_raw();
            node.run_state = RunState::GenerateAlias;
            Ok((StepResult::Progressed, None))
        }
        RunState::GenerateSeed => {
            node.seed = lfsr::advance(node.seed);
            node.run_state = RunState::GenerateAlias;
            Ok((StepResult::Progressed, None))
        }
        RunState::GenerateAlias => {
            let (seed, alias) = lfsr::fold_to_alias(node.seed);
            node.seed = seed;
            node.alias = openlcb_core::Alias::new(alias);
            alias_map
                .register(node.alias, node.id)
                .ok_or(Error::AliasMapExhausted)?;
            node.run_state = RunState::LoadCid7;
            Ok((StepResult::Progressed, None))
        }
        RunState::LoadCid7 => {
            let emit = CanEmit::control(FrameType::Cid7, node.id.cid7_bits(), node.alias);
            node.run_state = RunState::LoadCid6;
            Ok((StepResult::Progressed, Some(emit)))
        }
        RunState::LoadCid6 => {
            let emit = CanEmit::control(FrameType::Cid6, node.id.cid6_bits(), node.alias);
            node.run_state = RunState::LoadCid5;
            Ok((StepResult::Progressed, Some(emit)))
        }
        RunState::LoadCid5 => {
            let emit = CanEmit::control(FrameType::Cid5, node.id.cid5_bits(), node.alias);
            node.run_state = RunState::LoadCid4;
            Ok((StepResult::Progressed, Some(emit)))
        }
        RunState::LoadCid4 => {
            let emit = CanEmit::control(FrameType::Cid4, node.id.cid4_bits(), node.alias);
            node.timerticks = 0;
            node.run_state = RunState::WaitQuietWindow;
            Ok((StepResult::Progressed, Some(emit)))
        }
        RunState::WaitQuietWindow => {
            if node.timerticks < QUIET_WINDOW_TICKS {
                Ok((StepResult::Idle, None))
            } else {
                node.run_state = RunState::LoadRid;
                Ok((StepResult::Progressed, None))
            }
        }
        RunState::LoadRid => {
            let emit = CanEmit::control(FrameType::Rid, RID_VARIABLE_FIELD, node.alias);
            node.run_state = RunState::LoadAmd;
            Ok((StepResult::Progressed, Some(emit)))
        }
        RunState::LoadAmd => {
            let mut payload = Vec::new();
            payload.extend_from_slice(node.id.as_bytes()).ok();
            let emit = CanEmit {
                id: CanId {
                    frame_type: FrameType::Amd,
                    variable_field: AMD_VARIABLE_FIELD,
                    source_alias: node.alias,
                },
                payload,
            };
            node.flags.insert(NodeFlags::PERMITTED);
            if let Some(entry) = alias_map.find_by_alias_mut(node.alias) {
                entry.mark_permitted();
            }
            node.run_state = RunState::LoadInitComplete;
            Ok((StepResult::Progressed, Some(emit)))
        }
        // Past the CAN-level claim; the OpenLCB login sequence owns
        // everything from here (`login::openlcb`).
        _ => Ok((StepResult::Idle, None)),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use openlcb_core::NodeId;
    use openlcb_persistence::{DeclaredSpace, NodeParameters, Snip};

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
    fn full_claim_sequence_matches_expected_frame_order() {
        let mut node: Node<1, 1> = Node::new(NodeId::from_raw(0x0102_0304_0506), &PARAMS);
        let mut map: AliasMap<4> = AliasMap::new();

        // Init -> GenerateAlias -> LoadCid7
        step(&mut node, &mut map).unwrap();
        step(&mut node, &mut map).unwrap();

        let (_, cid7) = step(&mut node, &mut map).unwrap();
        assert_eq!(cid7.unwrap().id.frame_type, FrameType::Cid7);
        let (_, cid6) = step(&mut node, &mut map).unwrap();
        assert_eq!(cid6.unwrap().id.frame_type, FrameType::Cid6);
        let (_, cid5) = step(&mut node, &mut map).unwrap();
        assert_eq!(cid5.unwrap().id.frame_type, FrameType::Cid5);
        let (_, cid4) = step(&mut node, &mut map).unwrap();
        assert_eq!(cid4.unwrap().id.frame_type, FrameType::Cid4);
        assert_eq!(node.run_state, RunState::WaitQuietWindow);

        // Not yet 2 ticks: stays idle.
        let (result, emit) = step(&mut node, &mut map).unwrap();
        assert_eq!(result, StepResult::Idle);
        assert!(emit.is_none());

        tick(&mut node);
        tick(&mut node);
        let (result, _) = step(&mut node, &mut map).unwrap();
        assert_eq!(result, StepResult::Progressed);
        assert_eq!(node.run_state, RunState::LoadRid);

        let (_, rid) = step(&mut node, &mut map).unwrap();
        let rid = rid.unwrap();
        assert_eq!(rid.id.frame_type, FrameType::Rid);
        assert_eq!(rid.id.as_raw(), 0x1070_0000 | u16::from(node.alias) as u32);

        let (_, amd) = step(&mut node, &mut map).unwrap();
        let amd = amd.unwrap();
        assert_eq!(amd.id.frame_type, FrameType::Amd);
        assert_eq!(amd.id.as_raw(), 0x1070_1000 | u16::from(node.alias) as u32);
        assert_eq!(&amd.payload[..], node.id.as_bytes());
        assert!(node.flags.contains(NodeFlags::PERMITTED));
        assert!(map.find_by_alias(node.alias).unwrap().is_permitted());
        assert_eq!(node.run_state, RunState::LoadInitComplete);
    }

    #[test]
    fn alias_map_exhaustion_is_reported() {
        let mut node: Node<1, 1> = Node::new(NodeId::from_raw(1), &PARAMS);
        let mut other: Node<1, 1> = Node::new(NodeId::from_raw(2), &PARAMS);
        let mut map: AliasMap<1> = AliasMap::new();

        step(&mut other, &mut map).unwrap();
        step(&mut other, &mut map).unwrap(); // fills the one slot

        step(&mut node, &mut map).unwrap(); // Init -> GenerateAlias
        assert_eq!(step(&mut node, &mut map), Err(Error::AliasMapExhausted));
    }
}
