// Copyright 2018-2019 Mozilla
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

use std::{
    os::raw::c_uint,
    ptr,
    sync::Arc,
};

use log::warn;
use lmdb_sys as ffi;

use super::{
    empty_val,
    from_val,
    to_val,
    EnvironmentHandle,
    TxnHandle,
};
use crate::backend::{
    HandleKind,
    NativeHandle,
};
use crate::error::{
    lmdb_result,
    StoreError,
};
use crate::view::Scope;

#[derive(Debug)]
pub(crate) struct CursorHandle {
    cursor: *mut ffi::MDB_cursor,
    dbi: ffi::MDB_dbi,
    env: Arc<EnvironmentHandle>,
    scope: Scope,
    valid: bool,
}

// Only read-only cursors are pooled and moved between threads, under the
// same `MDB_NOTLS` contract as their transactions.
unsafe impl Send for CursorHandle {}

impl CursorHandle {
    pub(crate) fn open(txn: &TxnHandle, dbi: ffi::MDB_dbi) -> Result<CursorHandle, StoreError> {
        let raw_txn = txn.raw()?;
        let mut cursor: *mut ffi::MDB_cursor = ptr::null_mut();
        lmdb_result(unsafe { ffi::mdb_cursor_open(raw_txn, dbi, &mut cursor) })?;
        txn.env().cursor_opened();

        Ok(CursorHandle {
            cursor,
            dbi,
            env: txn.env().clone(),
            scope: txn.scope(),
            valid: true,
        })
    }

    pub(crate) fn dbi(&self) -> ffi::MDB_dbi {
        self.dbi
    }

    /// Whether this cursor is attached to the current activation of `txn`.
    pub(crate) fn is_bound_to(&self, txn: &TxnHandle) -> bool {
        self.valid && self.scope == txn.scope()
    }

    /// Rebind a read-only cursor to another read-only transaction.
    pub(crate) fn renew(&mut self, txn: &TxnHandle) -> Result<(), StoreError> {
        self.ensure_valid()?;
        if !txn.is_read_only() {
            return Err(StoreError::invalid_state("only read cursors can be renewed"));
        }
        let raw_txn = txn.raw()?;
        lmdb_result(unsafe { ffi::mdb_cursor_renew(raw_txn, self.cursor) })?;
        self.scope = txn.scope();
        Ok(())
    }

    /// Position the cursor and return the entry under it.
    ///
    /// # Safety
    ///
    /// The returned slices point into the transaction this cursor is bound
    /// to; `'txn` must not outlive that transaction, and for write
    /// transactions must not outlive the next mutation either.
    pub(crate) unsafe fn get<'txn>(
        &self,
        key: Option<&[u8]>,
        op: c_uint,
    ) -> Result<Option<(&'txn [u8], &'txn [u8])>, StoreError> {
        self.ensure_valid()?;
        let mut key_val = key.map_or_else(empty_val, to_val);
        let mut data_val = empty_val();
        match ffi::mdb_cursor_get(self.cursor, &mut key_val, &mut data_val, op) {
            0 => Ok(Some((from_val(&key_val), from_val(&data_val)))),
            ffi::MDB_NOTFOUND => Ok(None),
            code => Err(lmdb::Error::from_err_code(code).into()),
        }
    }

    pub(crate) fn put(&mut self, key: &[u8], value: &[u8], flags: c_uint) -> Result<(), StoreError> {
        self.ensure_valid()?;
        let mut key_val = to_val(key);
        let mut data_val = to_val(value);
        lmdb_result(unsafe { ffi::mdb_cursor_put(self.cursor, &mut key_val, &mut data_val, flags) })
    }

    pub(crate) fn del(&mut self, flags: c_uint) -> Result<(), StoreError> {
        self.ensure_valid()?;
        lmdb_result(unsafe { ffi::mdb_cursor_del(self.cursor, flags) })
    }

    /// Number of duplicates under the current key.
    pub(crate) fn count(&self) -> Result<usize, StoreError> {
        self.ensure_valid()?;
        let mut count: usize = 0;
        lmdb_result(unsafe { ffi::mdb_cursor_count(self.cursor, &mut count) })?;
        Ok(count)
    }
}

impl NativeHandle for CursorHandle {
    const KIND: HandleKind = HandleKind::Cursor;

    fn is_valid(&self) -> bool {
        self.valid
    }

    fn close(&mut self) {
        if self.valid {
            self.valid = false;
            unsafe { ffi::mdb_cursor_close(self.cursor) };
            self.env.cursor_released();
        }
    }
}

impl Drop for CursorHandle {
    fn drop(&mut self) {
        if self.valid {
            warn!("cursor handle dropped without close; closing");
            self.close();
        }
    }
}
