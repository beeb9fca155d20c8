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
    io,
    marker::PhantomData,
    os::raw::c_uint,
};

use lmdb::WriteFlags;
use lmdb_sys as ffi;

use crate::backend::{
    CursorHandle,
    HandleKind,
    NativeHandle,
    TxnHandle,
};
use crate::error::StoreError;
use crate::pool::Pool;
use crate::view::{
    BufferView,
    Scope,
};

/// A key and its value, both borrowed from the transaction.
pub type Entry<'txn> = (BufferView<'txn>, BufferView<'txn>);

/// # Safety
///
/// `'a` must not outlive the transaction `cursor` is bound to, nor any
/// mutation made through that transaction.
unsafe fn position<'a>(
    cursor: &CursorHandle,
    scope: Scope,
    key: Option<&[u8]>,
    op: c_uint,
) -> Result<Option<Entry<'a>>, StoreError> {
    Ok(cursor.get(key, op)?.map(|(k, v)| (BufferView::new(k, scope), BufferView::new(v, scope))))
}

/// Whether `e` is the engine refusing to work from an unpositioned cursor,
/// which it reports as `EINVAL`.
fn is_unpositioned(e: &StoreError) -> bool {
    match e {
        StoreError::Native(lmdb::Error::Other(code)) => {
            io::Error::from_raw_os_error(*code).kind() == io::ErrorKind::InvalidInput
        },
        _ => false,
    }
}

fn or_unpositioned<T>(result: Result<T, StoreError>, unpositioned: T) -> Result<T, StoreError> {
    match result {
        Err(ref e) if is_unpositioned(e) => Ok(unpositioned),
        other => other,
    }
}

/// A read-only cursor. Entries it returns stay readable for as long as the
/// transaction it came from, independent of later cursor moves.
pub struct RoCursor<'txn> {
    handle: Option<CursorHandle>,
    pool: Option<&'txn Pool>,
    scope: Scope,
    dup_sort: bool,
    _txn: PhantomData<&'txn TxnHandle>,
}

impl<'txn> RoCursor<'txn> {
    /// A cursor that goes back to `pool` when dropped.
    pub(crate) fn pooled(handle: CursorHandle, pool: &'txn Pool, scope: Scope, dup_sort: bool) -> RoCursor<'txn> {
        RoCursor {
            handle: Some(handle),
            pool: Some(pool),
            scope,
            dup_sort,
            _txn: PhantomData,
        }
    }

    /// A cursor that is closed when dropped.
    pub(crate) fn owned(handle: CursorHandle, scope: Scope, dup_sort: bool) -> RoCursor<'txn> {
        RoCursor {
            handle: Some(handle),
            pool: None,
            scope,
            dup_sort,
            _txn: PhantomData,
        }
    }

    fn step(&mut self, key: Option<&[u8]>, op: c_uint) -> Result<Option<Entry<'txn>>, StoreError> {
        let handle = self.handle.as_ref().ok_or(StoreError::ResourceClosed(HandleKind::Cursor))?;
        // The transaction outlives 'txn and is never mutated while this
        // cursor borrows it.
        unsafe { position(handle, self.scope, key, op) }
    }

    pub fn first(&mut self) -> Result<Option<Entry<'txn>>, StoreError> {
        self.step(None, ffi::MDB_FIRST)
    }

    pub fn last(&mut self) -> Result<Option<Entry<'txn>>, StoreError> {
        self.step(None, ffi::MDB_LAST)
    }

    pub fn next(&mut self) -> Result<Option<Entry<'txn>>, StoreError> {
        self.step(None, ffi::MDB_NEXT)
    }

    pub fn prev(&mut self) -> Result<Option<Entry<'txn>>, StoreError> {
        self.step(None, ffi::MDB_PREV)
    }

    /// The entry under the cursor; `None` before the cursor is positioned.
    pub fn current(&mut self) -> Result<Option<Entry<'txn>>, StoreError> {
        or_unpositioned(self.step(None, ffi::MDB_GET_CURRENT), None)
    }

    /// Position at the first key greater than or equal to `key`.
    pub fn seek<K: AsRef<[u8]>>(&mut self, key: K) -> Result<Option<Entry<'txn>>, StoreError> {
        self.step(Some(key.as_ref()), ffi::MDB_SET_RANGE)
    }

    /// Position at `key` exactly, on its first value.
    pub fn seek_exact<K: AsRef<[u8]>>(&mut self, key: K) -> Result<Option<Entry<'txn>>, StoreError> {
        self.step(Some(key.as_ref()), ffi::MDB_SET_KEY)
    }

    /// The next value under the current key. Always `None` outside
    /// duplicate-sorted databases.
    pub fn next_dup(&mut self) -> Result<Option<Entry<'txn>>, StoreError> {
        if !self.dup_sort {
            return Ok(None);
        }
        self.step(None, ffi::MDB_NEXT_DUP)
    }

    /// Number of values under the current key, 0 before the cursor is
    /// positioned.
    pub fn count(&mut self) -> Result<usize, StoreError> {
        if !self.dup_sort {
            // The engine only counts duplicates; a plain key has one value.
            return Ok(self.current()?.map_or(0, |_| 1));
        }
        let handle = self.handle.as_ref().ok_or(StoreError::ResourceClosed(HandleKind::Cursor))?;
        or_unpositioned(handle.count(), 0)
    }

    /// Every entry of the database, in engine key order.
    pub fn iter_start(&mut self) -> Iter<'_, 'txn> {
        let first = self.first();
        Iter::new(self, first, ffi::MDB_NEXT)
    }

    /// Every entry from the first key greater than or equal to `key`.
    pub fn iter_from<K: AsRef<[u8]>>(&mut self, key: K) -> Iter<'_, 'txn> {
        let first = self.seek(key);
        Iter::new(self, first, ffi::MDB_NEXT)
    }

    /// Every value stored under `key`. The sequence stops at the end of the
    /// key's duplicates; calling `dups` again starts it over.
    pub fn dups<K: AsRef<[u8]>>(&mut self, key: K) -> Iter<'_, 'txn> {
        let first = self.seek_exact(key);
        let next_op = if self.dup_sort { ffi::MDB_NEXT_DUP } else { STOP };
        Iter::new(self, first, next_op)
    }
}

impl<'txn> Drop for RoCursor<'txn> {
    fn drop(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            match self.pool {
                Some(pool) => pool.release_cursor(handle),
                None => handle.close(),
            }
        }
    }
}

// Marks an iterator that yields its first entry only.
const STOP: c_uint = c_uint::MAX;

/// A lazy, finite walk driven by a cursor.
pub struct Iter<'c, 'txn> {
    cursor: &'c mut RoCursor<'txn>,
    first: Option<Result<Option<Entry<'txn>>, StoreError>>,
    next_op: c_uint,
    done: bool,
}

impl<'c, 'txn> Iter<'c, 'txn> {
    fn new(
        cursor: &'c mut RoCursor<'txn>,
        first: Result<Option<Entry<'txn>>, StoreError>,
        next_op: c_uint,
    ) -> Iter<'c, 'txn> {
        Iter {
            cursor,
            first: Some(first),
            next_op,
            done: false,
        }
    }
}

impl<'c, 'txn> Iterator for Iter<'c, 'txn> {
    type Item = Result<Entry<'txn>, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let step = match self.first.take() {
            Some(first) => first,
            None if self.next_op == STOP => Ok(None),
            None => self.cursor.step(None, self.next_op),
        };
        match step {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            },
            Err(e) => {
                self.done = true;
                Some(Err(e))
            },
        }
    }
}

/// A cursor inside a write job. Entries borrow the cursor, so they have to
/// be dropped before the cursor writes again.
pub struct RwCursor<'w> {
    handle: CursorHandle,
    scope: Scope,
    dup_sort: bool,
    _writer: PhantomData<&'w mut TxnHandle>,
}

impl<'w> RwCursor<'w> {
    pub(crate) fn new(handle: CursorHandle, scope: Scope, dup_sort: bool) -> RwCursor<'w> {
        RwCursor {
            handle,
            scope,
            dup_sort,
            _writer: PhantomData,
        }
    }

    fn step(&mut self, key: Option<&[u8]>, op: c_uint) -> Result<Option<Entry<'_>>, StoreError> {
        unsafe { position(&self.handle, self.scope, key, op) }
    }

    pub fn first(&mut self) -> Result<Option<Entry<'_>>, StoreError> {
        self.step(None, ffi::MDB_FIRST)
    }

    pub fn last(&mut self) -> Result<Option<Entry<'_>>, StoreError> {
        self.step(None, ffi::MDB_LAST)
    }

    pub fn next(&mut self) -> Result<Option<Entry<'_>>, StoreError> {
        self.step(None, ffi::MDB_NEXT)
    }

    pub fn prev(&mut self) -> Result<Option<Entry<'_>>, StoreError> {
        self.step(None, ffi::MDB_PREV)
    }

    pub fn current(&mut self) -> Result<Option<Entry<'_>>, StoreError> {
        or_unpositioned(self.step(None, ffi::MDB_GET_CURRENT), None)
    }

    pub fn seek<K: AsRef<[u8]>>(&mut self, key: K) -> Result<Option<Entry<'_>>, StoreError> {
        self.step(Some(key.as_ref()), ffi::MDB_SET_RANGE)
    }

    pub fn seek_exact<K: AsRef<[u8]>>(&mut self, key: K) -> Result<Option<Entry<'_>>, StoreError> {
        self.step(Some(key.as_ref()), ffi::MDB_SET_KEY)
    }

    pub fn next_dup(&mut self) -> Result<Option<Entry<'_>>, StoreError> {
        if !self.dup_sort {
            return Ok(None);
        }
        self.step(None, ffi::MDB_NEXT_DUP)
    }

    /// Store `k`/`v` and leave the cursor on it. Pass `WriteFlags::CURRENT`
    /// to overwrite the entry under the cursor instead.
    pub fn put<K, V>(&mut self, k: K, v: V, flags: WriteFlags) -> Result<(), StoreError>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        self.handle.put(k.as_ref(), v.as_ref(), flags.bits())
    }

    /// Delete the entry under the cursor.
    pub fn delete_current(&mut self) -> Result<(), StoreError> {
        self.handle.del(0)
    }

    /// Delete every value under the current key.
    pub fn delete_current_dups(&mut self) -> Result<(), StoreError> {
        let flags = if self.dup_sort { ffi::MDB_NODUPDATA } else { 0 };
        self.handle.del(flags)
    }
}

impl<'w> Drop for RwCursor<'w> {
    fn drop(&mut self) {
        // Write cursors must be closed before their transaction ends.
        self.handle.close();
    }
}
