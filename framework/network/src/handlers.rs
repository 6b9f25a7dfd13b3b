//! Extension point for MTIs the core dispatcher does not itself answer,
//! such as Train Control or Train Search style protocols that plug in
//! via a handler table but carry little state machinery of their own.
//!
//! [`Dispatcher::step`](crate::dispatcher::Dispatcher::step) consults an
//! [`OptionalHandlers`] implementation only once its own closed MTI match
//! has declined an addressed message. `()` is the handler table with no
//! entries: every addressed MTI the core doesn't recognize still gets
//! Optional Interaction Rejected, exactly as if no extension were
//! installed.

use crate::buffer::Message;
use crate::node_pool::Node;

/// One or more MTI handlers layered on top of the core dispatch table,
/// keyed by the same per-node extension type `X` a [`Node`] already
/// carries.
///
/// Returning `None` means "not mine": the dispatcher falls through to
/// Optional Interaction Rejected for an addressed MTI, or silently drops
/// a global one, exactly as it would with no extension installed.
/// Returning `Some(reply)` claims the MTI, whether or not a reply is
/// produced.
pub trait OptionalHandlers<const PRODUCERS: usize, const CONSUMERS: usize, X> {
    fn handle(&mut self, node: &mut Node<'_, PRODUCERS, CONSUMERS, X>, message: &Message) -> Option<Option<Message>>;
}

/// The default, empty handler table: declines every MTI.
impl<const PRODUCERS: usize, const CONSUMERS: usize, X> OptionalHandlers<PRODUCERS, CONSUMERS, X> for () {
    fn handle(&mut self, _node: &mut Node<'_, PRODUCERS, CONSUMERS, X>, _message: &Message) -> Option<Option<Message>> {
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use openlcb_core::{Mti, NodeId};
    use openlcb_persistence::parameters::DeclaredSpace;
    use openlcb_persistence::{NodeParameters, Snip};

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
    fn unit_handler_table_declines_everything() {
        let mut node: Node<2, 2> = Node::new(NodeId::from_raw(1), &PARAMS);
        let mut basic = crate::buffer::BasicBuffer::default();
        basic.mti = Mti::Other(0x0F88);
        let message = Message::Basic(basic);
        let mut handlers = ();
        assert!(OptionalHandlers::<2, 2, ()>::handle(&mut handlers, &mut node, &message).is_none());
    }
}
