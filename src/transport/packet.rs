use serde::{Deserialize, Serialize};

use crate::broker::message::QoS;

/// A control packet handed to a session's connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Packet {
    #[serde(rename = "publish")]
    Publish {
        mid: u16,
        topic: String,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
        dup: bool,
    },
    #[serde(rename = "puback")]
    Puback { mid: u16 },
    #[serde(rename = "pubrec")]
    Pubrec { mid: u16 },
    #[serde(rename = "pubrel")]
    Pubrel { mid: u16, dup: bool },
    #[serde(rename = "pubcomp")]
    Pubcomp { mid: u16 },
}

impl Packet {
    pub fn mid(&self) -> u16 {
        match self {
            Packet::Publish { mid, .. }
            | Packet::Puback { mid }
            | Packet::Pubrec { mid }
            | Packet::Pubrel { mid, .. }
            | Packet::Pubcomp { mid } => *mid,
        }
    }

    /// Bytes this packet accounts for in the traffic counters.
    pub fn accounted_len(&self) -> usize {
        match self {
            Packet::Publish { topic, payload, .. } => topic.len() + payload.len(),
            _ => 2,
        }
    }
}
