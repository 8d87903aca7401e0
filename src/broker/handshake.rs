//! Acknowledgement handling
//!
//! The network layer calls into these once it has decoded a PUBLISH,
//! PUBACK, PUBREC, PUBREL or PUBCOMP from a client. Acknowledgements are
//! matched on message id and direction; one that matches nothing (a late
//! duplicate, or an id the peer made up) is logged and ignored.

use tracing::debug;

use crate::broker::admission::Admission;
use crate::broker::engine::{Database, PublishOutcome};
use crate::broker::message::{Direction, MessageState, QoS};
use crate::transport::Transport;
use crate::utils::{Clock, DbError, Result};

/// What happened to a PUBLISH received from a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundPublish {
    /// QoS 0 or 1: fanned out immediately.
    Queued(PublishOutcome),
    /// QoS 2: held until the client sends PUBREL.
    Held(Admission),
    /// QoS 2 retransmission of a message already held; PUBREC was resent.
    Duplicate,
}

impl<C: Clock> Database<C> {
    /// Accept a PUBLISH from `session_id`.
    #[allow(clippy::too_many_arguments)]
    pub fn receive_publish<T: Transport + ?Sized>(
        &mut self,
        session_id: &str,
        mid: u16,
        topic: &str,
        qos: QoS,
        payload: &[u8],
        retain: bool,
        transport: &mut T,
    ) -> Result<InboundPublish> {
        if self.session(session_id).is_none() {
            return Err(DbError::UnknownSession(session_id.to_string()));
        }
        transport.record_received(topic.len() + payload.len());

        match qos {
            QoS::AtMostOnce => {
                let outcome = self.ingest(session_id, mid, topic, qos, payload, retain)?;
                Ok(InboundPublish::Queued(outcome))
            }
            QoS::AtLeastOnce => {
                let outcome = self.ingest(session_id, mid, topic, qos, payload, retain)?;
                transport
                    .send_puback(session_id, mid)
                    .map_err(|e| DbError::transport(session_id, e))?;
                Ok(InboundPublish::Queued(outcome))
            }
            QoS::ExactlyOnce => {
                if self.find_inbound(session_id, mid).is_some() {
                    debug!(session = %session_id, mid, "duplicate qos 2 publish, resending pubrec");
                    transport
                        .send_pubrec(session_id, mid)
                        .map_err(|e| DbError::transport(session_id, e))?;
                    return Ok(InboundPublish::Duplicate);
                }

                let stored = self.store_message(session_id, mid, topic, qos, payload, retain, 0)?;
                let admission =
                    self.insert_delivery(session_id, mid, Direction::Inbound, qos, retain, &stored)?;
                if admission != Admission::Rejected {
                    transport
                        .send_pubrec(session_id, mid)
                        .map_err(|e| DbError::transport(session_id, e))?;
                }
                Ok(InboundPublish::Held(admission))
            }
        }
    }

    /// PUBACK ends a QoS 1 delivery.
    pub fn handle_puback(&mut self, session_id: &str, mid: u16) -> Result<bool> {
        if !self.expects(session_id, mid, QoS::AtLeastOnce)? {
            return Ok(false);
        }
        self.message_delete(session_id, mid, Direction::Outbound)
    }

    /// PUBREC moves a QoS 2 delivery to its release phase: PUBREL goes out
    /// and the entry waits for PUBCOMP. If PUBREL cannot be sent the entry
    /// stays in `WaitPubrel` and the timeout path resends it.
    pub fn handle_pubrec<T: Transport + ?Sized>(
        &mut self,
        session_id: &str,
        mid: u16,
        transport: &mut T,
    ) -> Result<bool> {
        if !self.expects(session_id, mid, QoS::ExactlyOnce)? {
            return Ok(false);
        }
        self.message_update(session_id, mid, Direction::Outbound, MessageState::WaitPubrel)?;
        transport
            .send_pubrel(session_id, mid, false)
            .map_err(|e| DbError::transport(session_id, e))?;
        self.message_update(session_id, mid, Direction::Outbound, MessageState::WaitPubcomp)
    }

    /// PUBCOMP ends a QoS 2 delivery.
    pub fn handle_pubcomp(&mut self, session_id: &str, mid: u16) -> Result<bool> {
        if !self.expects(session_id, mid, QoS::ExactlyOnce)? {
            return Ok(false);
        }
        self.message_delete(session_id, mid, Direction::Outbound)
    }

    /// PUBREL releases a held inbound QoS 2 message to its subscribers.
    /// PUBCOMP is sent even when nothing was held, so a client retrying
    /// after a lost PUBCOMP still finishes.
    pub fn handle_pubrel<T: Transport + ?Sized>(
        &mut self,
        session_id: &str,
        mid: u16,
        transport: &mut T,
    ) -> Result<Option<PublishOutcome>> {
        let outcome = self.message_release(session_id, mid, Direction::Inbound)?;
        transport
            .send_pubcomp(session_id, mid)
            .map_err(|e| DbError::transport(session_id, e))?;
        Ok(outcome)
    }

    /// Whether an outbound entry with `mid` and `qos` exists to be
    /// acknowledged.
    fn expects(&self, session_id: &str, mid: u16, qos: QoS) -> Result<bool> {
        let session = self
            .session(session_id)
            .ok_or_else(|| DbError::UnknownSession(session_id.to_string()))?;
        match session.find(mid, Direction::Outbound) {
            Some(entry) if entry.qos == qos => Ok(true),
            Some(entry) => {
                debug!(session = %session_id, mid, entry_qos = %entry.qos, ack_qos = %qos, "acknowledgement for wrong qos ignored");
                Ok(false)
            }
            None => {
                debug!(session = %session_id, mid, "acknowledgement for unknown message ignored");
                Ok(false)
            }
        }
    }
}
