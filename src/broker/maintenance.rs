//! Periodic maintenance
//!
//! Once per tick the loop rewinds stalled handshakes, refreshes `$SYS`,
//! drains every connected session, sweeps the message store and autosaves
//! the snapshot when due. `tick` does one round synchronously; `run` drives it
//! from a tokio task until the shutdown channel flips.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::broker::engine::Database;
use crate::broker::sys::SysTree;
use crate::config::Settings;
use crate::persistence::Persistence;
use crate::transport::{ChannelTransport, NetCounters, Transport};
use crate::utils::{Clock, lock_unpoisoned};

const TICK: Duration = Duration::from_secs(1);

/// What one maintenance round did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub timed_out: usize,
    pub sent: usize,
    pub completed: usize,
    pub failed_sessions: usize,
    pub reclaimed: usize,
    pub sys_published: usize,
    pub saved: bool,
}

#[derive(Debug)]
pub struct Maintenance {
    retry_interval: u64,
    sys_interval: u64,
    autosave_interval: u64,
    sys: SysTree,
    persistence: Option<Persistence>,
    last_autosave: i64,
}

impl Maintenance {
    /// `start` is the broker start time, used for uptime and as the first
    /// autosave reference point.
    pub fn new(settings: &Settings, persistence: Option<Persistence>, start: i64) -> Self {
        Self {
            retry_interval: settings.broker.retry_interval_secs,
            sys_interval: settings.sys.interval_secs,
            autosave_interval: settings.persistence.autosave_interval_secs,
            sys: SysTree::new(start),
            persistence,
            last_autosave: start,
        }
    }

    pub fn persistence(&self) -> Option<&Persistence> {
        self.persistence.as_ref()
    }

    pub fn tick<C: Clock, T: Transport + ?Sized>(
        &mut self,
        db: &mut Database<C>,
        transport: &mut T,
        net: &NetCounters,
    ) -> TickReport {
        let mut report = TickReport {
            timed_out: db.check_timeouts(self.retry_interval),
            ..TickReport::default()
        };

        match self.sys.update(db, self.sys_interval, net) {
            Ok(published) => report.sys_published = published,
            Err(e) => error!("failed to update $SYS tree: {e}"),
        }

        let drained = db.drain_all(transport);
        report.sent = drained.sent;
        report.completed = drained.completed;
        report.failed_sessions = drained.failed.len();

        report.reclaimed = db.garbage_collect();

        let now = db.now();
        if let Some(persistence) = &self.persistence {
            if self.autosave_interval != 0
                && now - self.last_autosave >= i64::try_from(self.autosave_interval).unwrap_or(i64::MAX)
            {
                self.last_autosave = now;
                match persistence.save(&*db) {
                    Ok(_) => report.saved = true,
                    Err(e) => error!("autosave failed: {e}"),
                }
            }
        }

        if report != TickReport::default() {
            debug!(?report, "maintenance tick");
        }
        report
    }

    /// Tick every second until `shutdown` is set. Locks are held only for
    /// the duration of one round.
    pub async fn run<C: Clock>(
        mut self,
        db: Arc<Mutex<Database<C>>>,
        transport: Arc<Mutex<ChannelTransport>>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Self {
        info!(
            retry_interval = self.retry_interval,
            sys_interval = self.sys_interval,
            "maintenance loop started"
        );
        let mut interval = tokio::time::interval(TICK);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let mut guard = lock_unpoisoned(&*db);
                    let mut out = lock_unpoisoned(&*transport);
                    let net = out.counters();
                    self.tick(&mut *guard, &mut *out, &net);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("maintenance loop stopped");
        self
    }
}
