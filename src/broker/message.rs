//! Message definitions for the delivery core
//!
//! `DeliveryEntry` is one obligation to deliver (or to receive an
//! acknowledgement for) a stored message on behalf of one session.
//! `MessageState` is the QoS handshake state of such an entry; the transition
//! tables used by the writer and the timeout scanner live here so both read
//! from the same place.
//!
//! Notes on fields:
//! - `mid`: protocol-level message id, distinct from the store id
//! - `retain`: retain flag as delivered to this recipient (a retained replay
//!   sets it even when the live publish did not)
//! - `dup`: set once the entry has been rewound by a timeout
//! - `timestamp`: unix seconds of the last state transition

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::broker::store::{StoreHandle, StoreRef, StoredMessage};
use crate::utils::DbError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl QoS {
    pub fn as_u8(self) -> u8 {
        match self {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }

    /// Entries above QoS 0 count against the inflight and queued caps.
    pub fn is_countable(self) -> bool {
        self != QoS::AtMostOnce
    }
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> Self {
        qos.as_u8()
    }
}

impl TryFrom<u8> for QoS {
    type Error = DbError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            _ => Err(DbError::InvalidArgument("qos must be 0, 1 or 2")),
        }
    }
}

impl fmt::Display for QoS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Broker to subscriber.
    Outbound,
    /// Publisher to broker (only QoS 2 is tracked).
    Inbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Outbound => f.write_str("outbound"),
            Direction::Inbound => f.write_str("inbound"),
        }
    }
}

/// Handshake state of a delivery entry. Completion is removal of the entry,
/// never a state value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageState {
    /// Waiting for the session to connect or for an inflight slot.
    Queued,
    Publish,
    PublishPuback,
    PublishPubrec,
    WaitPuback,
    WaitPubrec,
    ResendPubrec,
    WaitPubrel,
    ResendPubrel,
    WaitPubcomp,
    ResendPubcomp,
}

/// Control packet a state owes the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Publish,
    Pubrec,
    Pubrel,
    Pubcomp,
}

impl MessageState {
    /// First active state of an entry that is admitted or promoted.
    pub fn initial(direction: Direction, qos: QoS) -> Self {
        match (direction, qos) {
            (Direction::Outbound, QoS::AtMostOnce) => MessageState::Publish,
            (Direction::Outbound, QoS::AtLeastOnce) => MessageState::PublishPuback,
            (Direction::Outbound, QoS::ExactlyOnce) => MessageState::PublishPubrec,
            (Direction::Inbound, _) => MessageState::WaitPubrec,
        }
    }

    pub fn is_queued(self) -> bool {
        self == MessageState::Queued
    }

    /// Packet the writer must transmit for an entry in this state, if any.
    pub fn pending_packet(self, direction: Direction) -> Option<PacketKind> {
        match (self, direction) {
            (
                MessageState::Publish | MessageState::PublishPuback | MessageState::PublishPubrec,
                Direction::Outbound,
            ) => Some(PacketKind::Publish),
            (MessageState::ResendPubrec, _) => Some(PacketKind::Pubrec),
            (MessageState::ResendPubrel, _) => Some(PacketKind::Pubrel),
            (MessageState::ResendPubcomp, _) => Some(PacketKind::Pubcomp),
            _ => None,
        }
    }

    /// State after a successful transmission. `None` means the entry is done.
    pub fn after_send(self, direction: Direction) -> Option<MessageState> {
        match (self, direction) {
            (MessageState::Publish, _) => None,
            (MessageState::PublishPuback, _) => Some(MessageState::WaitPuback),
            (MessageState::PublishPubrec, _) => Some(MessageState::WaitPubrec),
            (MessageState::ResendPubrec, Direction::Outbound) => Some(MessageState::WaitPubrel),
            (MessageState::ResendPubrec, Direction::Inbound) => Some(MessageState::WaitPubrec),
            (MessageState::ResendPubrel, _) => Some(MessageState::WaitPubcomp),
            (MessageState::ResendPubcomp, _) => Some(MessageState::WaitPubrel),
            (other, _) => Some(other),
        }
    }

    /// Retransmit state for a stalled handshake; `None` if the state never
    /// times out.
    pub fn on_timeout(self, direction: Direction) -> Option<MessageState> {
        match (self, direction) {
            (MessageState::WaitPuback, _) => Some(MessageState::PublishPuback),
            (MessageState::WaitPubrec, Direction::Outbound) => Some(MessageState::PublishPubrec),
            (MessageState::WaitPubrec, Direction::Inbound) => Some(MessageState::ResendPubrec),
            (MessageState::WaitPubrel, _) => Some(MessageState::ResendPubrel),
            (MessageState::WaitPubcomp, _) => Some(MessageState::ResendPubcomp),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct DeliveryEntry {
    pub mid: u16,
    pub direction: Direction,
    pub qos: QoS,
    pub retain: bool,
    pub dup: bool,
    pub timestamp: i64,
    pub state: MessageState,
    store: StoreRef,
}

impl DeliveryEntry {
    /// Takes one counted reference on `stored`; dropping the entry gives it
    /// back.
    pub(crate) fn new(
        mid: u16,
        direction: Direction,
        qos: QoS,
        retain: bool,
        timestamp: i64,
        state: MessageState,
        stored: &StoreHandle,
    ) -> Self {
        Self {
            mid,
            direction,
            qos,
            retain,
            dup: false,
            timestamp,
            state,
            store: StoreRef::new(stored),
        }
    }

    pub fn stored(&self) -> &StoredMessage {
        &self.store
    }

    pub fn handle(&self) -> &StoreHandle {
        self.store.handle()
    }

    pub(crate) fn matches(&self, mid: u16, direction: Direction) -> bool {
        self.mid == mid && self.direction == direction
    }
}
