//! The `utils` module collects the pieces shared by every other module:
//! the crate error type, logging setup and the clock abstraction used for
//! handshake timestamps.

pub mod clock;
pub mod error;
pub mod logging;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{DbError, Result};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock `m`, taking the data even if another holder panicked.
pub fn lock_unpoisoned<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests;
