//! Per-instance write coalescing
//!
//! An instance has at most one [`PendingUpdate`] in flight. Requests that
//! arrive while it is outstanding merge into a single queued follow-up,
//! field by field, last writer wins.

use rowmirror_binlog::Row;
use tokio::sync::oneshot;

use crate::common::{CacheError, Result};

/// Completion handle of one `update` call.
pub(crate) type Waiter = oneshot::Sender<Result<()>>;

#[derive(Debug)]
pub(crate) struct PendingUpdate {
    /// Column values this write sets
    pub target: Row,
    pub waiters: Vec<Waiter>,
    /// Follow-up write requested while this one was in flight
    pub next: Option<Box<PendingUpdate>>,
    pub generation: u64,
    /// Signalled when the replication stream confirms this write
    pub ack: Option<oneshot::Sender<()>>,
}

impl PendingUpdate {
    pub fn new(target: Row, waiter: Waiter, generation: u64) -> Self {
        Self {
            target,
            waiters: vec![waiter],
            next: None,
            generation,
            ack: None,
        }
    }

    /// Values the instance will hold once every queued write lands.
    pub fn effective_target(&self) -> Row {
        let mut target = self.target.clone();
        if let Some(next) = &self.next {
            target.extend(next.target.clone());
        }
        target
    }

    /// Merge `delta` into the queued follow-up, creating it if needed.
    pub fn queue(&mut self, delta: Row, waiter: Waiter, generation: u64) {
        match &mut self.next {
            Some(next) => {
                next.target.extend(delta);
                next.waiters.push(waiter);
            }
            None => self.next = Some(Box::new(PendingUpdate::new(delta, waiter, generation))),
        }
    }

    /// Complete `waiter` together with the last queued write.
    pub fn wait(&mut self, waiter: Waiter) {
        match &mut self.next {
            Some(next) => next.waiters.push(waiter),
            None => self.waiters.push(waiter),
        }
    }

    pub fn waiter_count(&self) -> usize {
        self.waiters.len() + self.next.as_ref().map_or(0, |n| n.waiters.len())
    }

    /// Signal the write task that the replication stream confirmed this
    /// write. Returns `false` if it was already confirmed.
    pub fn acknowledge(&mut self) -> bool {
        match self.ack.take() {
            Some(ack) => {
                let _ = ack.send(());
                true
            }
            None => false,
        }
    }

    /// Fail this write and its follow-up.
    pub fn reject(self, err: &CacheError) {
        let PendingUpdate { waiters, next, .. } = self;
        resolve(waiters, Err(err.clone()));
        if let Some(next) = next {
            next.reject(err);
        }
    }
}

/// Deliver `result` to every waiter, in request order.
pub(crate) fn resolve(waiters: Vec<Waiter>, result: Result<()>) {
    for waiter in waiters {
        let _ = waiter.send(result.clone());
    }
}
