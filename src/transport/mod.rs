//! The `transport` module is the boundary between the delivery core and the
//! network layer.
//!
//! The core never touches sockets. It hands packets to a `Transport`, which
//! reports success or failure synchronously; a failure stops the current
//! drain pass for that session and nothing else. `ChannelTransport` is the
//! in-process implementation: every attached session gets an unbounded
//! channel, the same way connected clients are fed elsewhere in the broker.

pub mod channel;
pub mod packet;

pub use channel::ChannelTransport;
pub use packet::Packet;

use crate::broker::message::QoS;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("no connection attached")]
    NotAttached,
    #[error("connection closed")]
    Closed,
    #[error("send would block")]
    WouldBlock,
}

/// Traffic totals kept by the network layer, read by `$SYS` publication.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetCounters {
    pub msgs_received: u64,
    pub msgs_sent: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
}

pub trait Transport {
    #[allow(clippy::too_many_arguments)]
    fn send_publish(
        &mut self,
        session: &str,
        mid: u16,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
        dup: bool,
    ) -> Result<(), TransportError>;

    fn send_puback(&mut self, session: &str, mid: u16) -> Result<(), TransportError>;

    fn send_pubrec(&mut self, session: &str, mid: u16) -> Result<(), TransportError>;

    fn send_pubrel(&mut self, session: &str, mid: u16, dup: bool) -> Result<(), TransportError>;

    fn send_pubcomp(&mut self, session: &str, mid: u16) -> Result<(), TransportError>;

    /// Account for a PUBLISH read from a client. Implementations without
    /// traffic counters ignore it.
    fn record_received(&mut self, _bytes: usize) {}
}
