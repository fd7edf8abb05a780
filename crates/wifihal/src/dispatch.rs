//! The event dispatch loop.
//!
//! One task per HAL session blocks on the transport's multi-socket wait
//! and routes every framed message: handler registry first (vendor key,
//! then plain command key), correlation table for command replies keyed
//! by the netlink sequence number, and a logged drop for everything
//! else. Callbacks run on the loop task with no core lock held.
//!
//! Shutdown is cooperative: a watch-channel signal wakes the blocked
//! wait deterministically, any message already read is dispatched to
//! completion, and the loop transitions `Running → ShuttingDown →
//! Stopped`. `Stopped` is terminal for the session.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tokio::sync::watch;

use super::command::CommandTable;
use super::error::Error;
use super::event::EventMessage;
use super::handler::{HandlerKey, HandlerRegistry};
use super::message::{MessageIter, NLM_F_MULTI, NlMsgError, NlMsgType};
use super::transport::{SocketKind, Transport};

/// Lifecycle of the dispatch loop.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// No sockets are being waited on.
    Idle = 0,
    /// The loop is blocked on the multi-socket wait.
    Running = 1,
    /// Cancellation observed; no further data will be drained.
    ShuttingDown = 2,
    /// Terminal. Restarting requires a fresh session.
    Stopped = 3,
}

/// Atomic cell holding the loop state.
pub(crate) struct LoopStateCell(AtomicU8);

impl LoopStateCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(LoopState::Idle as u8))
    }

    pub(crate) fn get(&self) -> LoopState {
        match self.0.load(Ordering::Acquire) {
            0 => LoopState::Idle,
            1 => LoopState::Running,
            2 => LoopState::ShuttingDown,
            _ => LoopState::Stopped,
        }
    }

    pub(crate) fn set(&self, state: LoopState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Run the dispatch loop until cancelled or the transport dies.
///
/// `cancel` is the receiving end of the session's shutdown signal;
/// `changed()` resolving (value flipped or sender dropped) ends the
/// loop.
pub(crate) async fn run<T: Transport>(
    state: Arc<super::hal::HalState<T>>,
    mut cancel: watch::Receiver<bool>,
) {
    state.loop_state.set(LoopState::Running);

    loop {
        tokio::select! {
            biased;
            _ = cancel.changed() => break,
            next = state.transport.next_message() => match next {
                Ok((kind, data)) => dispatch_batch(&state.handlers, &state.commands, kind, &data),
                Err(e) => {
                    if is_overrun(&e) {
                        // Kernel dropped messages under load; the socket
                        // itself is still healthy.
                        tracing::warn!("receive overrun, driver messages lost");
                        continue;
                    }
                    tracing::warn!(error = %e, "transport receive failed, stopping loop");
                    break;
                }
            }
        }
    }

    state.loop_state.set(LoopState::ShuttingDown);
    state.loop_state.set(LoopState::Stopped);
    tracing::debug!("event dispatch loop stopped");
}

fn is_overrun(err: &Error) -> bool {
    matches!(err, Error::Io(e) if e.raw_os_error() == Some(libc::ENOBUFS))
}

/// Route every framed message in one receive batch.
pub(crate) fn dispatch_batch(
    handlers: &HandlerRegistry,
    commands: &CommandTable,
    kind: SocketKind,
    data: &[u8],
) {
    for result in MessageIter::new(data) {
        let (header, payload) = match result {
            Ok(parts) => parts,
            Err(e) => {
                tracing::debug!(?kind, error = %e, "malformed netlink frame, batch dropped");
                return;
            }
        };

        if header.is_control() {
            dispatch_control(commands, header.nlmsg_type, header.nlmsg_seq, payload);
            continue;
        }

        let msg = match EventMessage::parse(header, payload) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(?kind, error = %e, "undecodable driver message dropped");
                continue;
            }
        };

        let key = match msg.vendor() {
            Some((vendor_id, subcmd)) => HandlerKey::vendor(msg.cmd(), vendor_id, subcmd),
            None => HandlerKey::cmd(msg.cmd()),
        };

        if let Some(handler) = handlers.lookup(key) {
            // Invoked with the registry lock released; the handler may
            // register, unregister or issue commands.
            handler(&msg);
            continue;
        }

        if let Some(cmd) = commands.lookup(msg.seq()) {
            // Single-part replies release their id before the callback
            // runs, so the callback can immediately reissue. Multipart
            // replies stay tracked until DONE arrives.
            if header.nlmsg_flags & NLM_F_MULTI == 0 {
                commands.untrack(msg.seq());
            }
            cmd.on_reply(&msg);
            continue;
        }

        tracing::debug!(
            ?kind,
            cmd = msg.cmd(),
            vendor = ?msg.vendor(),
            seq = msg.seq(),
            "unmatched driver message dropped"
        );
    }
}

/// Handle netlink control messages (ERROR/ACK, DONE, NOOP, OVERRUN).
fn dispatch_control(commands: &CommandTable, msg_type: u16, seq: u32, payload: &[u8]) {
    match msg_type {
        NlMsgType::ERROR => {
            let result = match NlMsgError::from_bytes(payload) {
                Ok(err) if err.is_ack() => Ok(()),
                Ok(err) => Err(Error::from_errno(err.error)),
                Err(e) => {
                    tracing::debug!(seq, error = %e, "truncated error message dropped");
                    return;
                }
            };
            match commands.untrack(seq) {
                Some(cmd) => cmd.on_complete(result),
                None => tracing::debug!(seq, "ack for untracked command"),
            }
        }
        NlMsgType::DONE => {
            if let Some(cmd) = commands.untrack(seq) {
                cmd.on_complete(Ok(()));
            }
        }
        NlMsgType::OVERRUN => tracing::warn!(seq, "driver reports receive overrun"),
        _ => {} // NOOP: discard
    }
}
