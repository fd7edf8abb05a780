//! Socket transport: the seam between the dispatch core and the wire.
//!
//! The dispatch loop only needs two things from the wire: a way to send
//! a framed command, and a multi-socket wait that resolves with the next
//! message batch from whichever socket has data. [`NetlinkTransport`] is
//! the production implementation over three netlink sockets; the `lab`
//! module provides an in-process loopback for tests.

use std::future::Future;

use super::error::Result;
use super::genl::{self, FamilyInfo, nl80211};
use super::socket::{NetlinkSocket, Protocol};

/// Which HAL socket produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    /// Command socket: replies and ACKs for issued commands.
    Command,
    /// Event socket: multicast driver events.
    Event,
    /// User socket: driver/firmware log channel (NETLINK_USERSOCK).
    User,
}

/// Wire access for the dispatch core.
///
/// `next_message` is the blocking multi-socket wait; it must be
/// cancel-safe so the dispatch loop can race it against the shutdown
/// signal without losing a message that was never read.
pub trait Transport: Send + Sync + 'static {
    /// Send a framed command to the driver over the command socket.
    fn send(&self, msg: &[u8]) -> impl Future<Output = Result<()>> + Send;

    /// Wait until any socket delivers a message batch.
    fn next_message(&self) -> impl Future<Output = Result<(SocketKind, Vec<u8>)>> + Send;

    /// The resolved nl80211 family id, used as nlmsg_type when framing.
    fn family_id(&self) -> u16;
}

/// Production transport: command + event sockets on NETLINK_GENERIC and
/// the user socket on NETLINK_USERSOCK.
pub struct NetlinkTransport {
    cmd: NetlinkSocket,
    event: NetlinkSocket,
    user: NetlinkSocket,
    family: FamilyInfo,
}

impl NetlinkTransport {
    /// Open the three HAL sockets, resolve the nl80211 family and join
    /// its event multicast groups.
    ///
    /// Any failure here propagates to the caller; no partially-built
    /// transport is returned.
    pub async fn new() -> Result<Self> {
        let cmd = NetlinkSocket::new(Protocol::Generic)?;
        let mut event = NetlinkSocket::new(Protocol::Generic)?;
        let user = NetlinkSocket::new(Protocol::Usersock)?;

        let family = genl::resolve_family(&cmd, nl80211::FAMILY_NAME).await?;

        for group in nl80211::EVENT_GROUPS {
            if let Some(&id) = family.mcast_groups.get(group) {
                event.add_membership(id)?;
            } else {
                tracing::debug!(group, "driver does not expose multicast group");
            }
        }

        Ok(Self {
            cmd,
            event,
            user,
            family,
        })
    }

    /// The command socket, for issuers that need its port id.
    pub fn command_socket(&self) -> &NetlinkSocket {
        &self.cmd
    }

    /// Resolved family information.
    pub fn family(&self) -> &FamilyInfo {
        &self.family
    }
}

impl Transport for NetlinkTransport {
    async fn send(&self, msg: &[u8]) -> Result<()> {
        self.cmd.send(msg).await
    }

    async fn next_message(&self) -> Result<(SocketKind, Vec<u8>)> {
        // recv_msg has datagram semantics, so the losing branches of the
        // select never leave a half-read message behind.
        tokio::select! {
            r = self.cmd.recv_msg() => r.map(|data| (SocketKind::Command, data)),
            r = self.event.recv_msg() => r.map(|data| (SocketKind::Event, data)),
            r = self.user.recv_msg() => r.map(|data| (SocketKind::User, data)),
        }
    }

    fn family_id(&self) -> u16 {
        self.family.id
    }
}
