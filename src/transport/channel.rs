use std::collections::HashMap;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

use crate::broker::message::QoS;
use crate::transport::{NetCounters, Packet, Transport, TransportError};

/// Transport that forwards packets to per-session channels.
///
/// The connection task for a session calls `attach` and writes whatever
/// arrives on the receiver to its socket. A session without a sender, or
/// whose receiver was dropped, fails every send.
#[derive(Debug, Default)]
pub struct ChannelTransport {
    senders: HashMap<String, UnboundedSender<Packet>>,
    counters: NetCounters,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a channel for `session`, replacing any previous one.
    pub fn attach(&mut self, session: &str) -> UnboundedReceiver<Packet> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.insert(session.to_string(), tx);
        rx
    }

    pub fn detach(&mut self, session: &str) -> bool {
        self.senders.remove(session).is_some()
    }

    pub fn is_attached(&self, session: &str) -> bool {
        self.senders
            .get(session)
            .is_some_and(|tx| !tx.is_closed())
    }

    pub fn counters(&self) -> NetCounters {
        self.counters
    }

    fn send(&mut self, session: &str, packet: Packet) -> Result<(), TransportError> {
        let tx = self
            .senders
            .get(session)
            .ok_or(TransportError::NotAttached)?;
        let len = packet.accounted_len() as u64;
        if tx.send(packet).is_err() {
            debug!(session, "receiver dropped, detaching");
            self.senders.remove(session);
            return Err(TransportError::Closed);
        }
        self.counters.msgs_sent += 1;
        self.counters.bytes_sent += len;
        Ok(())
    }
}

impl Transport for ChannelTransport {
    fn send_publish(
        &mut self,
        session: &str,
        mid: u16,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
        dup: bool,
    ) -> Result<(), TransportError> {
        self.send(
            session,
            Packet::Publish {
                mid,
                topic: topic.to_string(),
                payload: payload.to_vec(),
                qos,
                retain,
                dup,
            },
        )
    }

    fn send_puback(&mut self, session: &str, mid: u16) -> Result<(), TransportError> {
        self.send(session, Packet::Puback { mid })
    }

    fn send_pubrec(&mut self, session: &str, mid: u16) -> Result<(), TransportError> {
        self.send(session, Packet::Pubrec { mid })
    }

    fn send_pubrel(&mut self, session: &str, mid: u16, dup: bool) -> Result<(), TransportError> {
        self.send(session, Packet::Pubrel { mid, dup })
    }

    fn send_pubcomp(&mut self, session: &str, mid: u16) -> Result<(), TransportError> {
        self.send(session, Packet::Pubcomp { mid })
    }

    fn record_received(&mut self, bytes: usize) {
        self.counters.msgs_received += 1;
        self.counters.bytes_received += bytes as u64;
    }
}
