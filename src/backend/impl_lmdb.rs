// Copyright 2018-2019 Mozilla
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

mod cursor;
mod database;
mod environment;
mod transaction;

use std::{
    os::raw::c_void,
    ptr,
    slice,
};

use lmdb_sys as ffi;

pub(crate) use cursor::CursorHandle;
pub(crate) use database::DatabaseHandle;
pub(crate) use environment::EnvironmentHandle;
pub(crate) use transaction::TxnHandle;

/// Describe caller memory to the engine. The engine only reads through the
/// pointer unless the call is a reserve, so the slice stays borrowed (and
/// therefore pinned) for the duration of the native call.
fn to_val(bytes: &[u8]) -> ffi::MDB_val {
    ffi::MDB_val {
        mv_size: bytes.len(),
        mv_data: bytes.as_ptr() as *mut c_void,
    }
}

fn empty_val() -> ffi::MDB_val {
    ffi::MDB_val {
        mv_size: 0,
        mv_data: ptr::null_mut(),
    }
}

/// Borrow engine memory described by `val`.
///
/// # Safety
///
/// `val` must come from the engine and `'a` must not outlive the transaction
/// that produced it.
unsafe fn from_val<'a>(val: &ffi::MDB_val) -> &'a [u8] {
    if val.mv_size == 0 || val.mv_data.is_null() {
        &[]
    } else {
        slice::from_raw_parts(val.mv_data as *const u8, val.mv_size)
    }
}
