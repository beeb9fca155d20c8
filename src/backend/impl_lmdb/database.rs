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
    ffi::CString,
    os::raw::c_uint,
    ptr,
};

use lmdb_sys as ffi;

use super::TxnHandle;
use crate::error::{
    lmdb_result,
    StoreError,
};

/// A database slot in the environment. The engine never needs these closed
/// explicitly; they stay valid for as long as the environment is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DatabaseHandle {
    pub(crate) dbi: ffi::MDB_dbi,
    pub(crate) flags: c_uint,
}

impl DatabaseHandle {
    /// Open (or with `MDB_CREATE`, create) a database inside `txn`. The
    /// handle is private to `txn` until it commits.
    pub(crate) fn open(txn: &TxnHandle, name: Option<&str>, flags: c_uint) -> Result<DatabaseHandle, StoreError> {
        let raw_txn = txn.raw()?;
        let c_name = match name {
            Some(name) => Some(
                CString::new(name).map_err(|_| StoreError::invalid_state(format!("bad database name {:?}", name)))?,
            ),
            None => None,
        };
        let name_ptr = c_name.as_ref().map_or(ptr::null(), |n| n.as_ptr());

        let mut dbi: ffi::MDB_dbi = 0;
        lmdb_result(unsafe { ffi::mdb_dbi_open(raw_txn, name_ptr, flags, &mut dbi) })?;

        // Read back what the engine actually recorded; opening an existing
        // database with no flags reports the flags it was created with.
        let mut actual: c_uint = 0;
        lmdb_result(unsafe { ffi::mdb_dbi_flags(raw_txn, dbi, &mut actual) })?;

        Ok(DatabaseHandle {
            dbi,
            flags: actual,
        })
    }
}
