// Copyright 2018-2019 Mozilla
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

//! Free lists of reset read transactions and read-only cursors.
//!
//! A released read transaction is reset (its snapshot dropped, its handle
//! kept) and parked here; the next reader renews it instead of allocating.
//! Cursors are parked per database and renewed onto whichever read
//! transaction asks for them next.
//!
//! The pool keeps at most `capacity` transactions, and at most `capacity`
//! cursors per database. A handle released into a full list is closed
//! immediately. Engine calls (renew, reset, close) happen outside the lock;
//! the lock only guards the lists.

use std::{
    collections::HashMap,
    sync::{
        atomic::{
            AtomicUsize,
            Ordering,
        },
        Arc,
    },
};

use log::{
    trace,
    warn,
};
use lmdb_sys as ffi;
use parking_lot::Mutex;
use serde::{
    Deserialize,
    Serialize,
};

use crate::backend::{
    CursorHandle,
    EnvironmentHandle,
    HandleKind,
    NativeHandle,
    TxnHandle,
};
use crate::error::StoreError;

/// A snapshot of pool activity. Counters cover transactions and cursors
/// together; the `pooled_*` and `live_*` fields are point-in-time gauges.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Handles allocated from the engine.
    pub created: usize,
    /// Parked handles handed out again.
    pub renewed: usize,
    /// Read transactions reset on release.
    pub reset: usize,
    /// Handles the pool closed: evicted, failed to renew, or drained.
    pub closed: usize,
    pub pooled_txns: usize,
    pub pooled_cursors: usize,
    pub live_txns: usize,
    pub live_cursors: usize,
}

#[derive(Default)]
struct FreeLists {
    txns: Vec<TxnHandle>,
    cursors: HashMap<ffi::MDB_dbi, Vec<CursorHandle>>,
    closed: bool,
}

pub(crate) struct Pool {
    env: Arc<EnvironmentHandle>,
    capacity: usize,
    lists: Mutex<FreeLists>,
    created: AtomicUsize,
    renewed: AtomicUsize,
    reset: AtomicUsize,
    closed: AtomicUsize,
}

impl Pool {
    pub(crate) fn new(env: Arc<EnvironmentHandle>, capacity: usize) -> Pool {
        Pool {
            env,
            capacity,
            lists: Mutex::new(FreeLists::default()),
            created: AtomicUsize::new(0),
            renewed: AtomicUsize::new(0),
            reset: AtomicUsize::new(0),
            closed: AtomicUsize::new(0),
        }
    }

    /// Return an active read transaction, renewed from the free list when
    /// one is parked there.
    pub(crate) fn acquire_txn(&self) -> Result<TxnHandle, StoreError> {
        let parked = {
            let mut lists = self.lists.lock();
            if lists.closed {
                return Err(StoreError::ResourceClosed(HandleKind::Environment));
            }
            lists.txns.pop()
        };

        if let Some(mut txn) = parked {
            match txn.renew() {
                Ok(()) => {
                    self.renewed.fetch_add(1, Ordering::Relaxed);
                    trace!("renewed pooled read transaction");
                    return Ok(txn);
                },
                Err(e) => {
                    warn!("renewing a pooled read transaction failed ({}); starting a fresh one", e);
                    self.close_txn(txn);
                },
            }
        }

        let txn = TxnHandle::begin(&self.env, true)?;
        self.created.fetch_add(1, Ordering::Relaxed);
        Ok(txn)
    }

    /// Take back a read transaction. Active handles are reset first; write
    /// transactions and handles that no longer fit are closed.
    pub(crate) fn release_txn(&self, mut txn: TxnHandle) {
        if !txn.is_read_only() || !txn.is_valid() {
            self.close_txn(txn);
            return;
        }
        if txn.reset().is_ok() {
            self.reset.fetch_add(1, Ordering::Relaxed);
        }

        let rejected = {
            let mut lists = self.lists.lock();
            if !lists.closed && lists.txns.len() < self.capacity {
                lists.txns.push(txn);
                None
            } else {
                Some(txn)
            }
        };
        if let Some(txn) = rejected {
            self.close_txn(txn);
        }
    }

    /// Return a cursor on `dbi` bound to the read transaction `txn`.
    pub(crate) fn acquire_cursor(&self, txn: &TxnHandle, dbi: ffi::MDB_dbi) -> Result<CursorHandle, StoreError> {
        if !txn.is_read_only() {
            return CursorHandle::open(txn, dbi);
        }

        let parked = {
            let mut lists = self.lists.lock();
            if lists.closed {
                return Err(StoreError::ResourceClosed(HandleKind::Environment));
            }
            lists.cursors.get_mut(&dbi).and_then(Vec::pop)
        };

        if let Some(mut cursor) = parked {
            match cursor.renew(txn) {
                Ok(()) => {
                    debug_assert!(cursor.is_bound_to(txn));
                    self.renewed.fetch_add(1, Ordering::Relaxed);
                    trace!("renewed pooled cursor on dbi {}", dbi);
                    return Ok(cursor);
                },
                Err(e) => {
                    warn!("renewing a pooled cursor failed ({}); opening a fresh one", e);
                    self.close_cursor(cursor);
                },
            }
        }

        let cursor = CursorHandle::open(txn, dbi)?;
        self.created.fetch_add(1, Ordering::Relaxed);
        Ok(cursor)
    }

    /// Park a read-only cursor for the next reader of the same database.
    pub(crate) fn release_cursor(&self, cursor: CursorHandle) {
        if !cursor.is_valid() {
            return;
        }
        let rejected = {
            let mut lists = self.lists.lock();
            let capacity = self.capacity;
            if lists.closed {
                Some(cursor)
            } else {
                let list = lists.cursors.entry(cursor.dbi()).or_insert_with(Vec::new);
                if list.len() < capacity {
                    list.push(cursor);
                    None
                } else {
                    Some(cursor)
                }
            }
        };
        if let Some(cursor) = rejected {
            self.close_cursor(cursor);
        }
    }

    /// Close every parked handle and refuse to park more. Handles still out
    /// on loan are closed as they come back.
    pub(crate) fn drain(&self) {
        let (txns, cursors) = {
            let mut lists = self.lists.lock();
            lists.closed = true;
            (std::mem::take(&mut lists.txns), std::mem::take(&mut lists.cursors))
        };
        // Cursors go first; none of them is bound to an active transaction.
        for cursor in cursors.into_iter().flat_map(|(_, list)| list) {
            self.close_cursor(cursor);
        }
        for txn in txns {
            self.close_txn(txn);
        }
    }

    pub(crate) fn stats(&self) -> PoolStats {
        let (pooled_txns, pooled_cursors) = {
            let lists = self.lists.lock();
            (lists.txns.len(), lists.cursors.values().map(Vec::len).sum())
        };
        PoolStats {
            created: self.created.load(Ordering::Relaxed),
            renewed: self.renewed.load(Ordering::Relaxed),
            reset: self.reset.load(Ordering::Relaxed),
            closed: self.closed.load(Ordering::Relaxed),
            pooled_txns,
            pooled_cursors,
            live_txns: self.env.live_txns(),
            live_cursors: self.env.live_cursors(),
        }
    }

    fn close_txn(&self, mut txn: TxnHandle) {
        if txn.is_valid() {
            self.closed.fetch_add(1, Ordering::Relaxed);
        }
        txn.close();
    }

    fn close_cursor(&self, mut cursor: CursorHandle) {
        if cursor.is_valid() {
            self.closed.fetch_add(1, Ordering::Relaxed);
        }
        cursor.close();
    }
}
