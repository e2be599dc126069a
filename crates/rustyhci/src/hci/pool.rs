//! ACL transmit buffer pool
//!
//! The controller advertises how many ACL packets it can hold. The pool hands
//! out at most that many slots (minus one, capped at 16) and tracks, per
//! connection handle, how many are still in flight. Slots come back through
//! Number Of Completed Packets or in bulk when a connection goes away.

use crate::context::{Context, Signal, POLL_INTERVAL};
use crate::error::HciError;
use crate::hci::constants::HCI_ACL_HDR_SIZE;
use std::collections::HashMap;
use std::sync::{Condvar, Mutex, MutexGuard};

/// Upper bound on pool slots
pub const MAX_POOL_BUFFERS: usize = 16;

/// A writable buffer borrowed from the pool
#[derive(Debug)]
pub struct AclBuffer {
    handle: u16,
    cap: usize,
    data: Vec<u8>,
}

impl AclBuffer {
    pub fn handle(&self) -> u16 {
        self.handle
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Room left before the buffer reaches pool capacity
    pub fn remaining(&self) -> usize {
        self.cap.saturating_sub(self.data.len())
    }

    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn push(&mut self, byte: u8) {
        self.data.push(byte);
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Debug, Default)]
struct PoolState {
    available: usize,
    storage: Vec<Vec<u8>>,
    outstanding: HashMap<u16, usize>,
}

/// Bounded pool of fixed capacity ACL buffers
#[derive(Debug)]
pub struct Pool {
    capacity: usize,
    count: usize,
    state: Mutex<PoolState>,
    cond: Condvar,
    write_lock: Mutex<()>,
}

impl Pool {
    /// Size a pool from the controller's buffer report.
    ///
    /// Buffers hold `1 + 4 + acl_len` bytes and there are
    /// `min(total_packets - 1, 16)` of them, at least one.
    pub fn new(acl_len: u16, total_packets: u16) -> Self {
        let capacity = 1 + HCI_ACL_HDR_SIZE + acl_len as usize;
        let count = (total_packets as usize)
            .saturating_sub(1)
            .clamp(1, MAX_POOL_BUFFERS);

        Self {
            capacity,
            count,
            state: Mutex::new(PoolState {
                available: count,
                storage: (0..count).map(|_| Vec::with_capacity(capacity)).collect(),
                outstanding: HashMap::new(),
            }),
            cond: Condvar::new(),
            write_lock: Mutex::new(()),
        }
    }

    /// Capacity of every buffer, including HCI and ACL headers
    pub fn buffer_capacity(&self) -> usize {
        self.capacity
    }

    /// ACL payload bytes that fit in one buffer
    pub fn payload_capacity(&self) -> usize {
        self.capacity - 1 - HCI_ACL_HDR_SIZE
    }

    pub fn count(&self) -> usize {
        self.count
    }

    fn state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Slots currently free
    pub fn available(&self) -> usize {
        self.state().available
    }

    /// Slots currently charged to `handle`
    pub fn outstanding(&self, handle: u16) -> usize {
        self.state().outstanding.get(&handle).copied().unwrap_or(0)
    }

    /// Borrow a buffer on behalf of `handle`, blocking until one is free.
    ///
    /// Gives up when `ctx` is done or `done` fires.
    pub fn acquire(&self, handle: u16, ctx: &Context, done: &Signal) -> Result<AclBuffer, HciError> {
        let mut state = self.state();
        loop {
            if state.available > 0 {
                state.available -= 1;
                *state.outstanding.entry(handle).or_insert(0) += 1;
                let mut data = state
                    .storage
                    .pop()
                    .unwrap_or_else(|| Vec::with_capacity(self.capacity));
                data.clear();
                return Ok(AclBuffer {
                    handle,
                    cap: self.capacity,
                    data,
                });
            }
            if let Some(err) = ctx.err() {
                return Err(err.into());
            }
            if done.is_set() {
                return Err(HciError::TransportClosed);
            }
            state = self
                .cond
                .wait_timeout(state, POLL_INTERVAL)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
    }

    /// Return the storage of a buffer that has been handed to the
    /// controller. The slot stays charged to its handle until released.
    pub fn recycle(&self, buf: AclBuffer) {
        self.state().storage.push(buf.data);
    }

    /// Return `n` slots charged to `handle`
    pub fn release(&self, handle: u16, n: usize) -> usize {
        let mut state = self.state();
        let released = match state.outstanding.get_mut(&handle) {
            Some(count) => {
                let k = n.min(*count);
                *count -= k;
                if *count == 0 {
                    state.outstanding.remove(&handle);
                }
                k
            }
            None => 0,
        };
        state.available += released;
        drop(state);
        if released > 0 {
            self.cond.notify_all();
        }
        released
    }

    /// Return every slot charged to `handle`
    pub fn release_all(&self, handle: u16) -> usize {
        let mut state = self.state();
        let released = state.outstanding.remove(&handle).unwrap_or(0);
        state.available += released;
        drop(state);
        if released > 0 {
            self.cond.notify_all();
        }
        released
    }

    /// Hold this guard across all fragments of one PDU
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|e| e.into_inner())
    }
}
