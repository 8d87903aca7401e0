//! Queue drain
//!
//! One pass over a session's sequence, in order, handing every entry that
//! owes the peer a packet to the transport. The first transport failure ends
//! the pass: entries before it keep whatever progress they made, the failed
//! entry is left exactly as it was and nothing after it is attempted.

use tracing::{debug, warn};

use crate::broker::admission::Limits;
use crate::broker::message::{DeliveryEntry, PacketKind};
use crate::client::Session;
use crate::transport::{Transport, TransportError};
use crate::utils::{DbError, Result};

/// What one drain pass did for a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    /// Packets handed to the transport.
    pub sent: usize,
    /// Entries removed because sending finished them.
    pub completed: usize,
}

pub(crate) fn drain<T: Transport + ?Sized>(
    session: &mut Session,
    limits: &Limits,
    now: i64,
    transport: &mut T,
) -> Result<DrainSummary> {
    if !session.is_connected() {
        return Err(DbError::NotConnected(session.id.clone()));
    }

    let mut summary = DrainSummary::default();
    let mut failure = None;
    let mut idx = 0;

    while idx < session.msgs.len() {
        let entry = &session.msgs[idx];
        if entry.state.is_queued() {
            idx += 1;
            continue;
        }
        let Some(kind) = entry.state.pending_packet(entry.direction) else {
            idx += 1;
            continue;
        };

        if let Err(e) = send(transport, &session.id, entry, kind) {
            warn!(session = %session.id, mid = entry.mid, error = %e, "send failed, stopping drain");
            failure = Some(e);
            break;
        }
        summary.sent += 1;

        let entry = &mut session.msgs[idx];
        match entry.state.after_send(entry.direction) {
            Some(next) => {
                entry.state = next;
                entry.timestamp = now;
                idx += 1;
            }
            None => {
                session.remove_at(idx);
                summary.completed += 1;
            }
        }
    }

    if summary.completed > 0 {
        session.promote(limits, now);
    }
    if summary.sent > 0 {
        debug!(session = %session.id, sent = summary.sent, completed = summary.completed, "drained");
    }

    match failure {
        Some(e) => Err(DbError::transport(&session.id, e)),
        None => Ok(summary),
    }
}

fn send<T: Transport + ?Sized>(
    transport: &mut T,
    session: &str,
    entry: &DeliveryEntry,
    kind: PacketKind,
) -> std::result::Result<(), TransportError> {
    match kind {
        PacketKind::Publish => {
            let stored = entry.stored();
            transport.send_publish(
                session,
                entry.mid,
                stored.topic(),
                stored.payload(),
                entry.qos,
                entry.retain,
                entry.dup,
            )
        }
        PacketKind::Pubrec => transport.send_pubrec(session, entry.mid),
        PacketKind::Pubrel => transport.send_pubrel(session, entry.mid, entry.dup),
        PacketKind::Pubcomp => transport.send_pubcomp(session, entry.mid),
    }
}
