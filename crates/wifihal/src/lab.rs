//! Lab helpers: drive the dispatch core without a kernel.
//!
//! [`LoopbackTransport`] satisfies the [`Transport`] contract over an
//! in-process channel, so tests (and the integration suite) can inject
//! driver messages and observe sent commands deterministically.
//!
//! Enabled with the `lab` feature:
//!
//! ```ignore
//! use wifihal::{WifiHal, lab};
//!
//! let (transport, injector) = lab::loopback(0x1c);
//! let hal = WifiHal::with_transport(transport);
//! hal.start();
//! injector.event(lab::vendor_event(0x1c, 0x1374, 5, &[]));
//! ```

use std::sync::Mutex as StdMutex;

use tokio::sync::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use super::builder::MessageBuilder;
use super::error::Result;
use super::genl::nl80211;
use super::transport::{SocketKind, Transport};

/// In-process transport backed by an unbounded channel.
pub struct LoopbackTransport {
    family_id: u16,
    sent: StdMutex<Vec<Vec<u8>>>,
    rx: Mutex<UnboundedReceiver<(SocketKind, Vec<u8>)>>,
}

/// Injects driver messages into a [`LoopbackTransport`].
#[derive(Clone)]
pub struct MessageInjector {
    tx: UnboundedSender<(SocketKind, Vec<u8>)>,
}

/// Create a loopback transport and its injector.
pub fn loopback(family_id: u16) -> (LoopbackTransport, MessageInjector) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        LoopbackTransport {
            family_id,
            sent: StdMutex::new(Vec::new()),
            rx: Mutex::new(rx),
        },
        MessageInjector { tx },
    )
}

impl LoopbackTransport {
    /// Commands captured from [`Transport::send`], in order.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }
}

impl Transport for LoopbackTransport {
    async fn send(&self, msg: &[u8]) -> Result<()> {
        self.sent.lock().unwrap().push(msg.to_vec());
        Ok(())
    }

    async fn next_message(&self) -> Result<(SocketKind, Vec<u8>)> {
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some(msg) => Ok(msg),
            // Injector dropped: behave like a quiet socket so shutdown
            // still comes from the cancellation signal.
            None => std::future::pending().await,
        }
    }

    fn family_id(&self) -> u16 {
        self.family_id
    }
}

impl MessageInjector {
    /// Inject a message on the event socket.
    pub fn event(&self, msg: Vec<u8>) {
        self.tx.send((SocketKind::Event, msg)).ok();
    }

    /// Inject a reply on the command socket.
    pub fn reply(&self, msg: Vec<u8>) {
        self.tx.send((SocketKind::Command, msg)).ok();
    }

    /// Inject a message on the user socket.
    pub fn user(&self, msg: Vec<u8>) {
        self.tx.send((SocketKind::User, msg)).ok();
    }
}

/// Frame a vendor event the way the driver would.
pub fn vendor_event(family_id: u16, vendor_id: u32, subcmd: u32, data: &[u8]) -> Vec<u8> {
    let mut builder = MessageBuilder::vendor(family_id, vendor_id, subcmd);
    if !data.is_empty() {
        let nest = builder.nest_start(nl80211::ATTR_VENDOR_DATA);
        builder.append_attr(1, data);
        builder.nest_end(nest);
    }
    builder.finish()
}

/// Frame a plain generic netlink event.
pub fn genl_event(family_id: u16, cmd: u8, seq: u32) -> Vec<u8> {
    let mut builder = MessageBuilder::genl(family_id, cmd, 0, 0);
    builder.set_seq(seq);
    builder.finish()
}
