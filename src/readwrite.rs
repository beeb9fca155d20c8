// Copyright 2018-2019 Mozilla
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

use std::sync::Arc;

use lmdb::{
    DatabaseFlags,
    WriteFlags,
};
use lmdb_sys as ffi;
use parking_lot::MutexGuard;

use crate::backend::{
    CursorHandle,
    DatabaseHandle,
    HandleKind,
    NativeHandle,
    TxnHandle,
};
use crate::cursor::{
    RoCursor,
    RwCursor,
};
use crate::env::Core;
use crate::error::StoreError;
use crate::store::{
    Database,
    DatabaseOptions,
};
use crate::view::{
    plain_bytes,
    BufferView,
    Plain,
    Scope,
};

/// Operations shared by read and write transactions.
pub trait Readable {
    /// The value under `k`, or `None` when the key is absent.
    fn get<'r, K: AsRef<[u8]>>(&'r self, db: &Database, k: K) -> Result<Option<BufferView<'r>>, StoreError>;

    fn open_ro_cursor<'r>(&'r self, db: &Database) -> Result<RoCursor<'r>, StoreError>;

    /// The id of the committed snapshot this transaction sees.
    fn snapshot_id(&self) -> Result<u64, StoreError>;
}

/// A read transaction borrowed from the environment's pool. Dropping it (or
/// calling `abort`) hands the handle back for renewal.
pub struct Reader {
    core: Arc<Core>,
    txn: Option<TxnHandle>,
}

impl Reader {
    pub(crate) fn new(core: Arc<Core>) -> Result<Reader, StoreError> {
        let txn = core.pool.acquire_txn()?;
        Ok(Reader {
            core,
            txn: Some(txn),
        })
    }

    fn txn(&self) -> Result<&TxnHandle, StoreError> {
        self.txn.as_ref().ok_or(StoreError::ResourceClosed(HandleKind::Transaction))
    }

    pub fn scope(&self) -> Result<Scope, StoreError> {
        Ok(self.txn()?.scope())
    }

    pub fn abort(self) {}

    /// Commit the read transaction so that databases it opened become
    /// visible to others, then give it back to the pool.
    pub(crate) fn commit(mut self) -> Result<(), StoreError> {
        match self.txn.take() {
            Some(mut txn) => {
                let result = txn.commit();
                self.core.pool.release_txn(txn);
                result
            },
            None => Err(StoreError::invalid_state("transaction already ended")),
        }
    }

    pub(crate) fn open_database_handle(&self, name: Option<&str>, flags: DatabaseFlags) -> Result<DatabaseHandle, StoreError> {
        DatabaseHandle::open(self.txn()?, name, flags.bits())
    }
}

impl Readable for Reader {
    fn get<'r, K: AsRef<[u8]>>(&'r self, db: &Database, k: K) -> Result<Option<BufferView<'r>>, StoreError> {
        let txn = self.txn()?;
        let dbi = db.dbi_for(self.core.id)?;
        Ok(txn.get(dbi, k.as_ref())?.map(|bytes| BufferView::new(bytes, txn.scope())))
    }

    fn open_ro_cursor<'r>(&'r self, db: &Database) -> Result<RoCursor<'r>, StoreError> {
        let txn = self.txn()?;
        let dbi = db.dbi_for(self.core.id)?;
        let cursor = self.core.pool.acquire_cursor(txn, dbi)?;
        Ok(RoCursor::pooled(cursor, &self.core.pool, txn.scope(), db.allows_duplicates()))
    }

    fn snapshot_id(&self) -> Result<u64, StoreError> {
        self.txn()?.id()
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        if let Some(txn) = self.txn.take() {
            self.core.pool.release_txn(txn);
        }
    }
}

/// The write transaction handed to a write job. It only exists on the
/// writer thread, for the duration of one job.
pub struct Writer<'w> {
    core: &'w Core,
    txn: TxnHandle,
    dbi_guard: Option<MutexGuard<'w, ()>>,
    opened: Vec<Database>,
}

impl<'w> Writer<'w> {
    pub(crate) fn begin(core: &'w Core) -> Result<Writer<'w>, StoreError> {
        let txn = TxnHandle::begin(&core.env, false)?;
        core.metrics.writer_started();
        Ok(Writer {
            core,
            txn,
            dbi_guard: None,
            opened: Vec::new(),
        })
    }

    pub(crate) fn commit(mut self) -> Result<(), StoreError> {
        self.txn.commit()?;
        for db in self.opened.drain(..) {
            self.core.remember_database(db);
        }
        Ok(())
    }

    pub(crate) fn abort(mut self) {
        self.txn.abort();
    }

    pub fn scope(&self) -> Scope {
        self.txn.scope()
    }

    pub fn put<K, V>(&mut self, db: &Database, k: K, v: V) -> Result<(), StoreError>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        self.put_with_flags(db, k, v, WriteFlags::empty())
    }

    pub fn put_with_flags<K, V>(&mut self, db: &Database, k: K, v: V, flags: WriteFlags) -> Result<(), StoreError>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let dbi = db.dbi_for(self.core.id)?;
        self.txn.put(dbi, k.as_ref(), v.as_ref(), flags.bits())
    }

    /// Store `value` in its native byte layout.
    pub fn put_value<K: AsRef<[u8]>, T: Plain>(&mut self, db: &Database, k: K, value: &T) -> Result<(), StoreError> {
        self.put(db, k, plain_bytes(value))
    }

    /// Have the engine allocate `len` bytes under `k` and let `fill` write
    /// them in place.
    pub fn put_reserved<K, F>(&mut self, db: &Database, k: K, len: usize, fill: F) -> Result<(), StoreError>
    where
        K: AsRef<[u8]>,
        F: FnOnce(&mut [u8]),
    {
        let dbi = db.dbi_for(self.core.id)?;
        let buf = self.txn.reserve(dbi, k.as_ref(), len, 0)?;
        fill(buf);
        Ok(())
    }

    /// Delete `k` and, in a duplicate-sorted database, every value under it.
    pub fn delete<K: AsRef<[u8]>>(&mut self, db: &Database, k: K) -> Result<(), StoreError> {
        let dbi = db.dbi_for(self.core.id)?;
        self.txn.del(dbi, k.as_ref(), None)
    }

    /// Delete the single pair `k`/`v`.
    pub fn delete_value<K, V>(&mut self, db: &Database, k: K, v: V) -> Result<(), StoreError>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let dbi = db.dbi_for(self.core.id)?;
        self.txn.del(dbi, k.as_ref(), Some(v.as_ref()))
    }

    pub fn clear(&mut self, db: &Database) -> Result<(), StoreError> {
        let dbi = db.dbi_for(self.core.id)?;
        self.txn.clear(dbi)
    }

    pub fn open_cursor<'c>(&'c mut self, db: &Database) -> Result<RwCursor<'c>, StoreError> {
        let dbi = db.dbi_for(self.core.id)?;
        let cursor = CursorHandle::open(&self.txn, dbi)?;
        Ok(RwCursor::new(cursor, self.txn.scope(), db.allows_duplicates()))
    }

    /// Open or create a database inside this transaction. It becomes visible
    /// to other transactions once this one commits.
    pub fn open_database<'s, T>(&mut self, name: T, options: DatabaseOptions) -> Result<Database, StoreError>
    where
        T: Into<Option<&'s str>>,
    {
        let name = name.into();
        if let Some(db) = self.core.cached_database(name) {
            return options.accept(db);
        }
        if let Some(db) = self.opened.iter().find(|db| db.name() == name) {
            return options.accept(db.clone());
        }

        // The engine forbids concurrent database opens; hold the lock until
        // this transaction ends.
        if self.dbi_guard.is_none() {
            self.dbi_guard = Some(self.core.dbi_lock.lock());
        }

        let mut flags = options.flags.bits();
        if options.create {
            flags |= ffi::MDB_CREATE;
        }
        let handle = DatabaseHandle::open(&self.txn, name, flags)?;
        let db = Database::new(handle.dbi, self.core.id, name, DatabaseFlags::from_bits_truncate(handle.flags));
        self.opened.push(db.clone());
        options.accept(db)
    }
}

impl<'w> Readable for Writer<'w> {
    fn get<'r, K: AsRef<[u8]>>(&'r self, db: &Database, k: K) -> Result<Option<BufferView<'r>>, StoreError> {
        let dbi = db.dbi_for(self.core.id)?;
        Ok(self.txn.get(dbi, k.as_ref())?.map(|bytes| BufferView::new(bytes, self.txn.scope())))
    }

    fn open_ro_cursor<'r>(&'r self, db: &Database) -> Result<RoCursor<'r>, StoreError> {
        let dbi = db.dbi_for(self.core.id)?;
        let cursor = CursorHandle::open(&self.txn, dbi)?;
        Ok(RoCursor::owned(cursor, self.txn.scope(), db.allows_duplicates()))
    }

    fn snapshot_id(&self) -> Result<u64, StoreError> {
        self.txn.id()
    }
}

impl<'w> Drop for Writer<'w> {
    fn drop(&mut self) {
        // Jobs end through commit or abort; this only catches the rest.
        if self.txn.is_valid() {
            self.txn.abort();
        }
        self.core.metrics.writer_finished();
    }
}
