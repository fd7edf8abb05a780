//! Decoded driver event envelope.

use std::ops::Range;

use super::attr::{AttrIter, get};
use super::error::{Error, Result};
use super::genl::{GENL_HDRLEN, GenlMsgHdr, nl80211};
use super::message::NlMsgHdr;

/// A single driver message, decoded down to the envelope the dispatcher
/// keys on: the generic netlink command and, for vendor messages, the
/// vendor id and subcommand.
///
/// Callbacks receive the envelope together with the raw payload and walk
/// the attributes themselves; vendor payload schemas are not modeled
/// here.
#[derive(Debug, Clone)]
pub struct EventMessage {
    /// Message payload after the netlink header (genl header + attributes).
    payload: Vec<u8>,
    /// Netlink sequence number; carries the request id for replies.
    seq: u32,
    /// Generic netlink command.
    cmd: u8,
    /// Vendor id + subcommand for `CMD_VENDOR` messages.
    vendor: Option<(u32, u32)>,
    /// Range of the vendor data attribute within `payload`.
    vendor_data: Option<Range<usize>>,
    /// Interface index the event refers to, when present.
    ifindex: Option<u32>,
}

impl EventMessage {
    /// Decode one framed message into an envelope.
    ///
    /// `payload` is the message body after the netlink header. Vendor
    /// messages missing the vendor id or subcommand attribute are
    /// malformed and rejected.
    pub fn parse(header: &NlMsgHdr, payload: &[u8]) -> Result<Self> {
        let genl = GenlMsgHdr::from_bytes(payload)?;
        let cmd = genl.cmd;

        let mut vendor_id = None;
        let mut vendor_subcmd = None;
        let mut vendor_data = None;
        let mut ifindex = None;

        for (attr_type, attr_payload) in AttrIter::new(&payload[GENL_HDRLEN..]) {
            match attr_type {
                nl80211::ATTR_IFINDEX => ifindex = Some(get::u32_ne(attr_payload)?),
                nl80211::ATTR_VENDOR_ID => vendor_id = Some(get::u32_ne(attr_payload)?),
                nl80211::ATTR_VENDOR_SUBCMD => vendor_subcmd = Some(get::u32_ne(attr_payload)?),
                nl80211::ATTR_VENDOR_DATA => {
                    // Payload slices borrow from `payload`; keep the range
                    let start = attr_payload.as_ptr() as usize - payload.as_ptr() as usize;
                    vendor_data = Some(start..start + attr_payload.len());
                }
                _ => {}
            }
        }

        let vendor = if cmd == nl80211::CMD_VENDOR {
            match (vendor_id, vendor_subcmd) {
                (Some(id), Some(subcmd)) => Some((id, subcmd)),
                _ => {
                    return Err(Error::InvalidMessage(
                        "vendor message without vendor id/subcmd".into(),
                    ));
                }
            }
        } else {
            None
        };

        Ok(Self {
            payload: payload.to_vec(),
            seq: header.nlmsg_seq,
            cmd,
            vendor,
            vendor_data,
            ifindex,
        })
    }

    /// The generic netlink command.
    pub fn cmd(&self) -> u8 {
        self.cmd
    }

    /// Vendor id and subcommand, for vendor messages.
    pub fn vendor(&self) -> Option<(u32, u32)> {
        self.vendor
    }

    /// Netlink sequence number (the request id for command replies).
    pub fn seq(&self) -> u32 {
        self.seq
    }

    /// Interface index the event refers to, when present.
    pub fn ifindex(&self) -> Option<u32> {
        self.ifindex
    }

    /// Raw message payload (genl header + attributes).
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Iterate the top-level attributes.
    pub fn attrs(&self) -> AttrIter<'_> {
        AttrIter::new(&self.payload[GENL_HDRLEN..])
    }

    /// The vendor data attribute payload, for vendor messages.
    pub fn vendor_data(&self) -> Option<&[u8]> {
        self.vendor_data.clone().map(|r| &self.payload[r])
    }
}
