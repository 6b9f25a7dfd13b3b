//! A single node hosted on a loopback bus: claims an alias, completes
//! OpenLCB login, and answers reads against a flash-backed configuration
//! space. No real CAN controller is involved — `LoopbackDevice` only
//! records the frames a real transport would have put on the wire, which
//! is enough to walk a node through the whole login sequence.

use embedded_storage::nor_flash::{NorFlash, ReadNorFlash};
use embedded_storage_inmemory::MemFlash;
use heapless::Vec;

use openlcb_core::NodeId;
use openlcb_network::config_memory::AddressSpaceTable;
use openlcb_network::phy::{Device, DeviceCapabilities, RxToken, TxToken};
use openlcb_network::wire::can::Frame;
use openlcb_persistence::parameters::DeclaredSpace;
use openlcb_persistence::{AddressSpaceHandler, AddressSpaceId, AddressSpaceInfo, MemoryError, NodeParameters, Snip};
use openlcb_node::Stack;

const SNIP: Snip = Snip {
    version_mfg: 4,
    manufacturer: b"Freja's Workshop\0",
    model: b"Minimalistic Demo Node\0",
    hardware_version: b"1.0\0",
    software_version: b"1.0\0",
    version_user: 2,
    user_name: b"\0",
    user_description: b"\0",
};
const DECLARED_SPACES: [DeclaredSpace; 1] = [DeclaredSpace {
    id: AddressSpaceId::Config,
    low_address: 0,
    highest_address: 127,
    read_only: false,
}];
const PARAMETERS: NodeParameters = NodeParameters {
    snip: SNIP,
    cdi_xml: None,
    protocol_support: 0,
    declared_spaces: &DECLARED_SPACES,
};

/// Backs address space `Config` with a 128-byte in-memory flash, the same
/// way a real deployment would back it with on-chip flash or EEPROM.
struct FlashConfig {
    flash: MemFlash<128, 1, 1>,
}

impl AddressSpaceHandler for FlashConfig {
    fn info(&self) -> AddressSpaceInfo {
        AddressSpaceInfo {
            present: true,
            read_only: false,
            low_address: 0,
            highest_address: 127,
        }
    }

    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<usize, MemoryError> {
        self.flash.read(address, buf).map_err(|_| MemoryError::ShortTransfer)?;
        Ok(buf.len())
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<usize, MemoryError> {
        self.flash.write(address, data).map_err(|_| MemoryError::ShortTransfer)?;
        Ok(data.len())
    }
}

/// A CAN medium with nobody else on it: every transmitted frame just
/// disappears, and nothing ever arrives. Good enough to exercise the
/// alias-claim and login handshake end to end; a real deployment swaps
/// this for `openlcb_network::phy::can::EmbeddedCan` over a driver that
/// implements `embedded_can::nb::Can`.
struct LoopbackDevice {
    transmitted: Vec<Vec<u8, 12>, 64>,
}

impl LoopbackDevice {
    fn new() -> Self {
        Self { transmitted: Vec::new() }
    }
}

struct NeverRx;
impl RxToken for NeverRx {
    fn consume<R, F>(self, _f: F) -> R
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        unreachable!("LoopbackDevice never produces a receive token")
    }
}

struct RecordTx<'d> {
    transmitted: &'d mut Vec<Vec<u8, 12>, 64>,
}

impl<'d> Clone for RecordTx<'d> {
    fn clone(&self) -> Self {
        unreachable!("not needed on a device with no peers")
    }
}

impl<'d> TxToken for RecordTx<'d> {
    fn consume<R, F>(self, len: usize, f: F) -> R
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        let mut buf = Vec::new();
        buf.resize_default(len).ok();
        let result = f(&mut buf);
        self.transmitted.push(buf).ok();
        result
    }
}

impl Device for LoopbackDevice {
    type RxToken<'a> = NeverRx;
    type TxToken<'a> = RecordTx<'a>;

    fn receive(&mut self) -> Option<(Self::RxToken<'_>, Self::TxToken<'_>)> {
        None
    }

    fn transmit(&mut self) -> Option<Self::TxToken<'_>> {
        Some(RecordTx { transmitted: &mut self.transmitted })
    }

    fn capabilities(&self) -> DeviceCapabilities {
        DeviceCapabilities::default()
    }
}

fn main() {
    let mut config = FlashConfig { flash: MemFlash::new(0xff) };
    let mut table = AddressSpaceTable::new();
    table.register(AddressSpaceId::Config, &mut config);

    let mut stack: Stack<'_, 1, 2, 2, 4, 2, 2, 8, 2> = Stack::new(table);
    let node = stack.add_node(NodeId::from_raw(0x01_02_03_04_05_06), &PARAMETERS).unwrap();

    let mut device = LoopbackDevice::new();

    // Drive the node through alias claim, the quiet window, and login. A
    // real main loop calls `tick()` from a 100 ms timer and `poll()` from
    // whatever idle loop or interrupt feeds inbound frames.
    for _ in 0..4 {
        stack.poll(&mut device);
    }
    stack.tick();
    stack.tick();
    for _ in 0..16 {
        stack.poll(&mut device);
    }

    let hosted = stack.node(node).expect("node was just added");
    assert!(hosted.flags.contains(openlcb_core::NodeFlags::PERMITTED));
    assert_eq!(hosted.run_state, openlcb_core::RunState::Run);

    let frames_sent = device.transmitted.len();
    let frame_types: Vec<_, 64> = device
        .transmitted
        .iter()
        .filter_map(|bytes| Frame::new_checked(&bytes[..]).ok().map(|f| f.id().frame_type))
        .collect();
    println!("node claimed its alias and completed login in {frames_sent} frames: {frame_types:?}");
}
