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
    slice,
    sync::Arc,
};

use log::warn;
use lmdb_sys as ffi;

use super::{
    empty_val,
    from_val,
    to_val,
    EnvironmentHandle,
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

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxnState {
    Active,
    /// Read-only handle whose snapshot was dropped; it can be renewed.
    Reset,
    Released,
}

#[derive(Debug)]
pub(crate) struct TxnHandle {
    txn: *mut ffi::MDB_txn,
    env: Arc<EnvironmentHandle>,
    read_only: bool,
    state: TxnState,
    scope: Scope,
}

// Environments are always opened with `MDB_NOTLS`, so a read-only
// transaction is not bound to the thread that began it. Write transactions
// never leave the writer thread; `Writer` is not `Send`.
unsafe impl Send for TxnHandle {}

impl TxnHandle {
    pub(crate) fn begin(env: &Arc<EnvironmentHandle>, read_only: bool) -> Result<TxnHandle, StoreError> {
        let raw_env = env.raw()?;
        let flags = if read_only { ffi::MDB_RDONLY } else { 0 };
        let mut txn: *mut ffi::MDB_txn = ptr::null_mut();
        lmdb_result(unsafe { ffi::mdb_txn_begin(raw_env, ptr::null_mut(), flags, &mut txn) })?;
        env.txn_opened();

        Ok(TxnHandle {
            txn,
            env: env.clone(),
            read_only,
            state: TxnState::Active,
            scope: Scope::next(),
        })
    }

    pub(crate) fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub(crate) fn env(&self) -> &Arc<EnvironmentHandle> {
        &self.env
    }

    /// Identifies the current activation. It changes on every renewal.
    pub(crate) fn scope(&self) -> Scope {
        self.scope
    }

    pub(crate) fn raw(&self) -> Result<*mut ffi::MDB_txn, StoreError> {
        match self.state {
            TxnState::Active => Ok(self.txn),
            _ => Err(StoreError::ResourceClosed(HandleKind::Transaction)),
        }
    }

    /// The snapshot id this transaction reads from.
    pub(crate) fn id(&self) -> Result<u64, StoreError> {
        let txn = self.raw()?;
        Ok(unsafe { ffi::mdb_txn_id(txn) } as u64)
    }

    pub(crate) fn commit(&mut self) -> Result<(), StoreError> {
        match self.state {
            TxnState::Active => {
                // The engine frees the handle whether or not the commit succeeds.
                self.state = TxnState::Released;
                self.env.txn_released();
                lmdb_result(unsafe { ffi::mdb_txn_commit(self.txn) })
            },
            TxnState::Reset => Err(StoreError::invalid_state("cannot commit a reset transaction")),
            TxnState::Released => Err(StoreError::invalid_state("transaction already ended")),
        }
    }

    pub(crate) fn abort(&mut self) {
        self.close();
    }

    /// Drop the snapshot but keep the handle for a later `renew`.
    pub(crate) fn reset(&mut self) -> Result<(), StoreError> {
        if !self.read_only {
            return Err(StoreError::invalid_state("only read transactions can be reset"));
        }
        let txn = self.raw()?;
        unsafe { ffi::mdb_txn_reset(txn) };
        self.state = TxnState::Reset;
        Ok(())
    }

    /// Acquire a fresh snapshot on a reset handle.
    pub(crate) fn renew(&mut self) -> Result<(), StoreError> {
        match self.state {
            TxnState::Reset => {
                lmdb_result(unsafe { ffi::mdb_txn_renew(self.txn) })?;
                self.state = TxnState::Active;
                self.scope = Scope::next();
                Ok(())
            },
            TxnState::Active => Err(StoreError::invalid_state("transaction is already active")),
            TxnState::Released => Err(StoreError::ResourceClosed(HandleKind::Transaction)),
        }
    }

    pub(crate) fn get(&self, dbi: ffi::MDB_dbi, key: &[u8]) -> Result<Option<&[u8]>, StoreError> {
        let txn = self.raw()?;
        let mut key_val = to_val(key);
        let mut data_val = empty_val();
        match unsafe { ffi::mdb_get(txn, dbi, &mut key_val, &mut data_val) } {
            0 => Ok(Some(unsafe { from_val(&data_val) })),
            ffi::MDB_NOTFOUND => Ok(None),
            code => Err(lmdb::Error::from_err_code(code).into()),
        }
    }

    pub(crate) fn put(&mut self, dbi: ffi::MDB_dbi, key: &[u8], value: &[u8], flags: c_uint) -> Result<(), StoreError> {
        let txn = self.writable()?;
        let mut key_val = to_val(key);
        let mut data_val = to_val(value);
        lmdb_result(unsafe { ffi::mdb_put(txn, dbi, &mut key_val, &mut data_val, flags) })
    }

    /// Let the engine allocate `len` bytes for `key` and hand them out for
    /// the caller to fill.
    pub(crate) fn reserve(
        &mut self,
        dbi: ffi::MDB_dbi,
        key: &[u8],
        len: usize,
        flags: c_uint,
    ) -> Result<&mut [u8], StoreError> {
        let txn = self.writable()?;
        let mut key_val = to_val(key);
        let mut data_val = ffi::MDB_val {
            mv_size: len,
            mv_data: ptr::null_mut(),
        };
        lmdb_result(unsafe { ffi::mdb_put(txn, dbi, &mut key_val, &mut data_val, flags | ffi::MDB_RESERVE) })?;
        if len == 0 {
            return Ok(&mut []);
        }
        Ok(unsafe { slice::from_raw_parts_mut(data_val.mv_data as *mut u8, len) })
    }

    pub(crate) fn del(&mut self, dbi: ffi::MDB_dbi, key: &[u8], value: Option<&[u8]>) -> Result<(), StoreError> {
        let txn = self.writable()?;
        let mut key_val = to_val(key);
        let code = match value {
            Some(value) => {
                let mut data_val = to_val(value);
                unsafe { ffi::mdb_del(txn, dbi, &mut key_val, &mut data_val) }
            },
            None => unsafe { ffi::mdb_del(txn, dbi, &mut key_val, ptr::null_mut()) },
        };
        lmdb_result(code)
    }

    /// Empty the database but keep it open.
    pub(crate) fn clear(&mut self, dbi: ffi::MDB_dbi) -> Result<(), StoreError> {
        let txn = self.writable()?;
        lmdb_result(unsafe { ffi::mdb_drop(txn, dbi, 0) })
    }

    fn writable(&self) -> Result<*mut ffi::MDB_txn, StoreError> {
        if self.read_only {
            return Err(StoreError::invalid_state("write attempted in a read transaction"));
        }
        self.raw()
    }
}

impl NativeHandle for TxnHandle {
    const KIND: HandleKind = HandleKind::Transaction;

    fn is_valid(&self) -> bool {
        self.state != TxnState::Released
    }

    fn close(&mut self) {
        if self.is_valid() {
            unsafe { ffi::mdb_txn_abort(self.txn) };
            self.state = TxnState::Released;
            self.env.txn_released();
        }
    }
}

impl Drop for TxnHandle {
    fn drop(&mut self) {
        if self.is_valid() {
            warn!("transaction handle dropped without commit or abort; aborting");
            self.close();
        }
    }
}
