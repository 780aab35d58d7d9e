use crate::base::{Error, Result};
use crate::types::Sample;
use log::{trace, warn};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Slot {
    samples: Vec<Sample>,
    fresh: bool,
}

/// Single-slot, latest-wins mailbox carrying completed revolutions from the
/// capture thread to readers.
///
/// Publishing overwrites whatever the slot holds; a retrieve consumes it.
#[derive(Debug, Clone, Default)]
pub struct RevolutionHandoff {
    inner: Arc<(Mutex<Slot>, Condvar)>,
}

impl RevolutionHandoff {
    pub fn new() -> RevolutionHandoff {
        RevolutionHandoff::default()
    }

    /// Replaces the slot content with `samples` and wakes waiting readers.
    pub fn publish(&self, samples: &[Sample]) {
        let (lock, cvar) = &*self.inner;
        let Ok(mut slot) = lock.lock() else {
            warn!("Handoff lock poisoned, dropping revolution");
            return;
        };
        slot.samples.clear();
        slot.samples.extend_from_slice(samples);
        slot.fresh = true;
        trace!("Published revolution of {} samples", samples.len());
        cvar.notify_all();
    }

    /// Wakes readers without data, making pending `retrieve` calls fail.
    pub fn wake(&self) {
        let (lock, cvar) = &*self.inner;
        if let Ok(mut slot) = lock.lock() {
            slot.samples.clear();
            slot.fresh = true;
        }
        cvar.notify_all();
    }

    /// Discards any unread revolution.
    pub fn clear(&self) {
        let (lock, _) = &*self.inner;
        if let Ok(mut slot) = lock.lock() {
            slot.samples.clear();
            slot.fresh = false;
        }
    }

    /// Waits up to `timeout` for a fresh revolution and returns at most
    /// `max` of its samples.
    ///
    /// Fails with `OperationTimeout` when nothing is published in time and
    /// with `OperationFail` when woken by `wake`.
    pub fn retrieve(&self, max: usize, timeout: Duration) -> Result<Vec<Sample>> {
        let (lock, cvar) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut slot = lock
            .lock()
            .map_err(|_| Error::fail("handoff lock poisoned"))?;

        while !slot.fresh {
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::OperationTimeout);
            }
            let (guard, _) = cvar
                .wait_timeout(slot, deadline - now)
                .map_err(|_| Error::fail("handoff lock poisoned"))?;
            slot = guard;
        }

        slot.fresh = false;
        if slot.samples.is_empty() {
            return Err(Error::fail("capture stopped"));
        }

        let count = max.min(slot.samples.len());
        let samples = slot.samples[..count].to_vec();
        slot.samples.clear();
        Ok(samples)
    }
}

/// Cloneable handle for reading revolutions from other threads.
#[derive(Debug, Clone)]
pub struct RevolutionReader {
    handoff: RevolutionHandoff,
    timeout: Duration,
}

impl RevolutionReader {
    pub(crate) fn new(handoff: RevolutionHandoff, timeout: Duration) -> RevolutionReader {
        RevolutionReader { handoff, timeout }
    }

    /// Waits for the next revolution using the driver's default timeout.
    pub fn next_revolution(&self, max: usize) -> Result<Vec<Sample>> {
        self.handoff.retrieve(max, self.timeout)
    }

    pub fn next_revolution_with_timeout(&self, max: usize, timeout: Duration) -> Result<Vec<Sample>> {
        self.handoff.retrieve(max, timeout)
    }
}
