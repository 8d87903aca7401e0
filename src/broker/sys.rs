//! `$SYS` statistics
//!
//! Broker status is published as ordinary retained QoS 2 messages under
//! `$SYS/broker/`, so any client can subscribe to it. Each value is only
//! republished when it changed since the last update; the last values seen
//! live in `SysTree` itself.

use tracing::debug;

use crate::broker::engine::Database;
use crate::broker::message::QoS;
use crate::transport::NetCounters;
use crate::utils::{Clock, Result};

const VERSION: &str = concat!("mqdb version ", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Default)]
pub struct SysTree {
    start: i64,
    last_update: Option<i64>,
    version_sent: bool,
    uptime: Option<i64>,
    stored: Option<usize>,
    stored_bytes: Option<usize>,
    clients_total: Option<usize>,
    clients_inactive: Option<usize>,
    clients_active: Option<usize>,
    clients_maximum: usize,
    msgs_received: Option<u64>,
    msgs_sent: Option<u64>,
    bytes_received: Option<u64>,
    bytes_sent: Option<u64>,
}

impl SysTree {
    /// `start` is the broker start time in unix seconds.
    pub fn new(start: i64) -> Self {
        Self {
            start,
            ..Self::default()
        }
    }

    /// Publish whatever changed, at most once every `interval` seconds.
    /// An interval of 0 disables publication. Returns the number of topics
    /// published.
    pub fn update<C: Clock>(
        &mut self,
        db: &mut Database<C>,
        interval: u64,
        net: &NetCounters,
    ) -> Result<usize> {
        if interval == 0 {
            return Ok(0);
        }
        let now = db.now();
        let interval = i64::try_from(interval).unwrap_or(i64::MAX);
        if self.last_update.is_some_and(|last| now - last < interval) {
            return Ok(0);
        }
        self.last_update = Some(now);

        // sampled before this round stores anything
        let stored = db.store_count();
        let stored_bytes = db.store_bytes();

        let mut published = 0;
        if !self.version_sent {
            publish(db, "$SYS/broker/version", VERSION)?;
            self.version_sent = true;
            published += 1;
        }

        let uptime = now - self.start;
        published += publish_changed(
            db,
            &mut self.uptime,
            uptime,
            "$SYS/broker/uptime",
            &format!("{uptime} seconds"),
        )?;
        published += publish_changed(
            db,
            &mut self.stored,
            stored,
            "$SYS/broker/messages/stored",
            &stored.to_string(),
        )?;
        published += publish_changed(
            db,
            &mut self.stored_bytes,
            stored_bytes,
            "$SYS/broker/store/messages/bytes",
            &stored_bytes.to_string(),
        )?;

        let (total, inactive) = db.session_count();
        let active = total - inactive;
        published += publish_changed(
            db,
            &mut self.clients_total,
            total,
            "$SYS/broker/clients/total",
            &total.to_string(),
        )?;
        published += publish_changed(
            db,
            &mut self.clients_inactive,
            inactive,
            "$SYS/broker/clients/inactive",
            &inactive.to_string(),
        )?;
        published += publish_changed(
            db,
            &mut self.clients_active,
            active,
            "$SYS/broker/clients/active",
            &active.to_string(),
        )?;
        if total > self.clients_maximum {
            publish(db, "$SYS/broker/clients/maximum", &total.to_string())?;
            self.clients_maximum = total;
            published += 1;
        }

        let counters = [
            ("$SYS/broker/messages/received", net.msgs_received, &mut self.msgs_received),
            ("$SYS/broker/messages/sent", net.msgs_sent, &mut self.msgs_sent),
            ("$SYS/broker/bytes/received", net.bytes_received, &mut self.bytes_received),
            ("$SYS/broker/bytes/sent", net.bytes_sent, &mut self.bytes_sent),
        ];
        for (topic, value, last) in counters {
            published += publish_changed(db, last, value, topic, &value.to_string())?;
        }

        debug!(published, "updated $SYS tree");
        Ok(published)
    }
}

/// Publish `value` under `topic` unless it equals `last`. `last` only
/// moves once the publish went through, so a failed one is retried next
/// round.
pub(super) fn publish_changed<C: Clock, T: PartialEq + Copy>(
    db: &mut Database<C>,
    last: &mut Option<T>,
    value: T,
    topic: &str,
    text: &str,
) -> Result<usize> {
    if *last == Some(value) {
        return Ok(0);
    }
    publish(db, topic, text)?;
    *last = Some(value);
    Ok(1)
}

fn publish<C: Clock>(db: &mut Database<C>, topic: &str, value: &str) -> Result<()> {
    db.store_and_queue(None, topic, QoS::ExactlyOnce, value.as_bytes(), true)?;
    Ok(())
}
