//! Generic Netlink support: header, control family, nl80211 envelope.
//!
//! GENL messages have an additional header after the standard netlink header:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ nlmsghdr (16 bytes)                     │
//! │   nlmsg_len, nlmsg_type (family_id),    │
//! │   nlmsg_flags, nlmsg_seq, nlmsg_pid     │
//! ├─────────────────────────────────────────┤
//! │ genlmsghdr (4 bytes)                    │
//! │   cmd (u8), version (u8), reserved (u16)│
//! ├─────────────────────────────────────────┤
//! │ Attributes (TLV format)                 │
//! └─────────────────────────────────────────┘
//! ```
//!
//! The wifi driver speaks the dynamically-assigned `nl80211` family plus
//! vendor extensions carried in `CMD_VENDOR` messages. Only the envelope
//! (command, vendor id, vendor subcommand) is modeled here; vendor
//! payload schemas belong to the feature subsystems.

use std::collections::HashMap;
use std::mem;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use super::attr::{AttrIter, get};
use super::builder::MessageBuilder;
use super::error::{Error, Result};
use super::message::{MessageIter, NLM_F_ACK, NlMsgError};
use super::socket::NetlinkSocket;

/// Generic Netlink message header.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct GenlMsgHdr {
    /// Command identifier (family-specific)
    pub cmd: u8,
    /// Interface version
    pub version: u8,
    /// Reserved for future use
    pub reserved: u16,
}

/// Size of the GENL header in bytes.
pub const GENL_HDRLEN: usize = mem::size_of::<GenlMsgHdr>();

impl GenlMsgHdr {
    /// Create a new GENL header with the given command and version.
    #[inline]
    pub const fn new(cmd: u8, version: u8) -> Self {
        Self {
            cmd,
            version,
            reserved: 0,
        }
    }

    /// Parse a header from a byte slice.
    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        Self::ref_from_prefix(data)
            .map(|(r, _)| r)
            .map_err(|_| Error::Truncated {
                expected: GENL_HDRLEN,
                actual: data.len(),
            })
    }

    /// Get the header as a byte slice.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        <Self as IntoBytes>::as_bytes(self)
    }
}

// Control family constants (fixed, not dynamically assigned)
pub const GENL_ID_CTRL: u16 = 0x10;

/// Control family commands
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtrlCmd {
    Unspec = 0,
    NewFamily = 1,
    DelFamily = 2,
    GetFamily = 3,
}

/// Control family attributes
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtrlAttr {
    Unspec = 0,
    FamilyId = 1,
    FamilyName = 2,
    Version = 3,
    HdrSize = 4,
    MaxAttr = 5,
    Ops = 6,
    McastGroups = 7,
}

/// Control family multicast group attributes
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtrlAttrMcastGrp {
    Unspec = 0,
    Name = 1,
    Id = 2,
}

/// nl80211 envelope constants: the commands and attributes the dispatch
/// core needs to decode and frame driver traffic.
pub mod nl80211 {
    /// Generic Netlink family name of the wifi subsystem.
    pub const FAMILY_NAME: &str = "nl80211";

    pub const CMD_TRIGGER_SCAN: u8 = 33;
    pub const CMD_NEW_SCAN_RESULTS: u8 = 34;
    pub const CMD_RADAR_DETECT: u8 = 59;
    /// Vendor-extension command; carries `ATTR_VENDOR_*` attributes.
    pub const CMD_VENDOR: u8 = 103;

    pub const ATTR_IFINDEX: u16 = 3;
    pub const ATTR_VENDOR_ID: u16 = 195;
    pub const ATTR_VENDOR_SUBCMD: u16 = 196;
    pub const ATTR_VENDOR_DATA: u16 = 197;

    /// Multicast groups the event socket joins at bring-up.
    pub const EVENT_GROUPS: [&str; 4] = ["scan", "mlme", "vendor", "regulatory"];
}

/// Information about a resolved Generic Netlink family.
#[derive(Debug, Clone)]
pub struct FamilyInfo {
    /// Dynamically assigned family ID (used as nlmsg_type).
    pub id: u16,
    /// Family version.
    pub version: u8,
    /// Multicast groups: name -> group ID.
    pub mcast_groups: HashMap<String, u32>,
}

/// Query the kernel for family information over the given socket.
///
/// Sends `CTRL_CMD_GETFAMILY` and parses the reply. Used once during
/// HAL bring-up to resolve the nl80211 family id and its event groups.
pub async fn resolve_family(socket: &NetlinkSocket, name: &str) -> Result<FamilyInfo> {
    let mut builder = MessageBuilder::genl(GENL_ID_CTRL, CtrlCmd::GetFamily as u8, 1, NLM_F_ACK);
    builder.append_attr_str(CtrlAttr::FamilyName as u16, name);

    let seq = socket.next_seq();
    builder.set_seq(seq);
    builder.set_pid(socket.pid());

    socket.send(&builder.finish()).await?;
    let response = socket.recv_msg().await?;
    parse_family_response(&response, seq, name)
}

/// Parse a CTRL_CMD_GETFAMILY response.
fn parse_family_response(data: &[u8], seq: u32, name: &str) -> Result<FamilyInfo> {
    for result in MessageIter::new(data) {
        let (header, payload) = result?;

        if header.nlmsg_seq != seq {
            continue;
        }

        if header.is_error() {
            let err = NlMsgError::from_bytes(payload)?;
            if !err.is_ack() {
                // ENOENT means the family is not registered
                if err.error == -libc::ENOENT {
                    return Err(Error::FamilyNotFound {
                        name: name.to_string(),
                    });
                }
                return Err(Error::from_errno(err.error));
            }
            continue;
        }

        if header.is_done() {
            continue;
        }

        if payload.len() < GENL_HDRLEN {
            return Err(Error::InvalidMessage("GENL header too short".into()));
        }

        return parse_family_attrs(&payload[GENL_HDRLEN..]);
    }

    Err(Error::FamilyNotFound {
        name: name.to_string(),
    })
}

/// Parse family attributes from a CTRL_CMD_GETFAMILY response.
fn parse_family_attrs(data: &[u8]) -> Result<FamilyInfo> {
    let mut id: Option<u16> = None;
    let mut version: u8 = 0;
    let mut mcast_groups = HashMap::new();

    for (attr_type, payload) in AttrIter::new(data) {
        match attr_type {
            t if t == CtrlAttr::FamilyId as u16 => {
                id = Some(get::u16_ne(payload)?);
            }
            t if t == CtrlAttr::Version as u16 => {
                version = get::u32_ne(payload)? as u8;
            }
            t if t == CtrlAttr::McastGroups as u16 => {
                mcast_groups = parse_mcast_groups(payload)?;
            }
            _ => {}
        }
    }

    let id = id.ok_or_else(|| Error::InvalidMessage("missing family ID".into()))?;

    Ok(FamilyInfo {
        id,
        version,
        mcast_groups,
    })
}

/// Parse multicast groups from CTRL_ATTR_MCAST_GROUPS.
fn parse_mcast_groups(data: &[u8]) -> Result<HashMap<String, u32>> {
    let mut groups = HashMap::new();

    // The mcast_groups attribute contains nested arrays
    for (_group_idx, group_payload) in AttrIter::new(data) {
        let mut name: Option<String> = None;
        let mut grp_id: Option<u32> = None;

        for (attr_type, payload) in AttrIter::new(group_payload) {
            match attr_type {
                t if t == CtrlAttrMcastGrp::Name as u16 => {
                    name = Some(get::string(payload)?.to_string());
                }
                t if t == CtrlAttrMcastGrp::Id as u16 => {
                    grp_id = Some(get::u32_ne(payload)?);
                }
                _ => {}
            }
        }

        if let (Some(name), Some(id)) = (name, grp_id) {
            groups.insert(name, id);
        }
    }

    Ok(groups)
}
