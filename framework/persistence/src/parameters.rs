//! Caller-owned, immutable per-node data: SNIP strings, the protocol-
//! support bitmask, and the declared address-space table (§3, §4.9).

use crate::address_space::AddressSpaceId;

/// A SNIP (Simple Node Information Protocol) string table (§4.9, §6).
///
/// SNIP packs two null-terminated-string groups back to back: a
/// manufacturer group (`manufacturer`, `model`, `hardware_version`,
/// `software_version`) followed by a user group (`user_name`,
/// `user_description`). Every field is stored as caller-owned bytes
/// including the trailing NUL; `openlcb-network::config_memory` copies
/// them verbatim into a Get-SNIP-reply or an ACDI read, never
/// reformatting them.
#[derive(Debug, Clone, Copy)]
pub struct Snip<'a> {
    pub version_mfg: u8,
    pub manufacturer: &'a [u8],
    pub model: &'a [u8],
    pub hardware_version: &'a [u8],
    pub software_version: &'a [u8],
    pub version_user: u8,
    pub user_name: &'a [u8],
    pub user_description: &'a [u8],
}

impl<'a> Snip<'a> {
    /// Append the full SNIP reply body (both version bytes and all six
    /// NUL-terminated fields, in wire order) to `out`, returning the
    /// number of bytes written, or `None` if `out` is too small.
    pub fn encode_into(&self, out: &mut [u8]) -> Option<usize> {
        let mut n = 0usize;
        let mut push = |bytes: &[u8], n: &mut usize| -> Option<()> {
            let end = *n + bytes.len();
            if end > out.len() {
                return None;
            }
            out[*n..end].copy_from_slice(bytes);
            *n = end;
            Some(())
        };
        if n + 1 > out.len() {
            return None;
        }
        out[n] = self.version_mfg;
        n += 1;
        push(self.manufacturer, &mut n)?;
        push(self.model, &mut n)?;
        push(self.hardware_version, &mut n)?;
        push(self.software_version, &mut n)?;
        if n + 1 > out.len() {
            return None;
        }
        out[n] = self.version_user;
        n += 1;
        push(self.user_name, &mut n)?;
        push(self.user_description, &mut n)?;
        Some(n)
    }
}

/// An entry in the node's declared address-space table (§4.9): the space
/// id plus the bounds and read-only flag a Get-Address-Space-Info query
/// should answer with, mirrored here so the network layer can answer
/// without calling into the (possibly more expensive) handler.
#[derive(Debug, Clone, Copy)]
pub struct DeclaredSpace {
    pub id: AddressSpaceId,
    pub low_address: u32,
    pub highest_address: u32,
    pub read_only: bool,
}

/// Immutable, caller-owned per-node configuration (§3's Node record
/// "parameters" field, §4.9).
///
/// A `NodeParameters` is shared (by shared reference) across every node
/// using the same identity and firmware image; nothing in
/// `openlcb-network` ever mutates it. `protocol_support` is the 48-bit
/// Protocol Support Inquiry reply bitmask (§4.9, §6), carried here as a
/// `u64` with only the low 48 bits defined. `cdi_xml` is the raw CDI
/// document served from address space `0xFF`; `None` if the node
/// declares no CDI.
#[derive(Debug, Clone, Copy)]
pub struct NodeParameters<'a> {
    pub snip: Snip<'a>,
    pub cdi_xml: Option<&'a [u8]>,
    pub protocol_support: u64,
    pub declared_spaces: &'a [DeclaredSpace],
}

impl<'a> NodeParameters<'a> {
    pub fn declared_space(&self, id: AddressSpaceId) -> Option<&DeclaredSpace> {
        self.declared_spaces.iter().find(|space| space.id == id)
    }
}
