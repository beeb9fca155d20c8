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
    path::Path,
    sync::atomic::{
        AtomicUsize,
        Ordering,
    },
};

use log::debug;
use lmdb_sys as ffi;

use crate::backend::{
    HandleKind,
    Info,
    NativeHandle,
    Stat,
};
use crate::env::EnvironmentConfig;
use crate::error::{
    lmdb_result,
    StoreError,
};

// `MDB_CP_COMPACT` from lmdb.h.
const COPY_COMPACT: c_uint = 0x01;

/// The engine environment, plus counts of the transaction and cursor
/// handles hanging off it.
#[derive(Debug)]
pub(crate) struct EnvironmentHandle {
    env: Option<lmdb::Environment>,
    live_txns: AtomicUsize,
    live_cursors: AtomicUsize,
}

impl EnvironmentHandle {
    pub(crate) fn open(path: &Path, config: &EnvironmentConfig) -> Result<EnvironmentHandle, StoreError> {
        let env = lmdb::Environment::new()
            .set_flags(config.native_flags())
            .set_max_readers(config.max_readers)
            .set_max_dbs(config.max_dbs)
            .set_map_size(config.map_size)
            .open(path)?;
        debug!("opened environment at {:?}", path);

        Ok(EnvironmentHandle {
            env: Some(env),
            live_txns: AtomicUsize::new(0),
            live_cursors: AtomicUsize::new(0),
        })
    }

    fn env(&self) -> Result<&lmdb::Environment, StoreError> {
        self.env.as_ref().ok_or(StoreError::ResourceClosed(HandleKind::Environment))
    }

    /// The raw pointer, for the calls the `lmdb` crate does not wrap.
    pub(crate) fn raw(&self) -> Result<*mut ffi::MDB_env, StoreError> {
        Ok(self.env()?.env())
    }

    pub(crate) fn stat(&self) -> Result<Stat, StoreError> {
        let stat = self.env()?.stat()?;
        Ok(Stat {
            page_size: stat.page_size(),
            depth: stat.depth(),
            branch_pages: stat.branch_pages(),
            leaf_pages: stat.leaf_pages(),
            overflow_pages: stat.overflow_pages(),
            entries: stat.entries(),
        })
    }

    pub(crate) fn info(&self) -> Result<Info, StoreError> {
        let info = self.env()?.info()?;
        Ok(Info {
            map_size: info.map_size(),
            last_pgno: info.last_pgno(),
            last_txnid: info.last_txnid(),
            max_readers: info.max_readers(),
            num_readers: info.num_readers(),
        })
    }

    /// Pages in use, free list excluded, over all pages of the map.
    pub(crate) fn load_ratio(&self) -> Result<f32, StoreError> {
        let env = self.env()?;
        let stat = env.stat()?;
        let info = env.info()?;
        let freelist = env.freelist()?;

        let last_pgno = info.last_pgno() + 1;
        let total_pgs = info.map_size() / stat.page_size() as usize;
        if freelist > last_pgno {
            return Err(lmdb::Error::Corrupted.into());
        }
        Ok((last_pgno - freelist) as f32 / total_pgs as f32)
    }

    pub(crate) fn max_key_size(&self) -> Result<usize, StoreError> {
        let env = self.raw()?;
        let size = unsafe { ffi::mdb_env_get_maxkeysize(env) };
        Ok(size as usize)
    }

    pub(crate) fn sync(&self, force: bool) -> Result<(), StoreError> {
        Ok(self.env()?.sync(force)?)
    }

    /// Write a consistent copy of the environment into the directory `path`.
    pub(crate) fn copy_to(&self, path: &Path, compact: bool) -> Result<(), StoreError> {
        let env = self.raw()?;
        let c_path = path_to_cstring(path)?;
        let flags = if compact { COPY_COMPACT } else { 0 };
        lmdb_result(unsafe { ffi::mdb_env_copy2(env, c_path.as_ptr(), flags) })
    }

    pub(crate) fn txn_opened(&self) {
        self.live_txns.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn txn_released(&self) {
        self.live_txns.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn cursor_opened(&self) {
        self.live_cursors.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn cursor_released(&self) {
        self.live_cursors.fetch_sub(1, Ordering::SeqCst);
    }

    /// Transaction handles currently allocated, active or reset.
    pub(crate) fn live_txns(&self) -> usize {
        self.live_txns.load(Ordering::SeqCst)
    }

    pub(crate) fn live_cursors(&self) -> usize {
        self.live_cursors.load(Ordering::SeqCst)
    }
}

impl NativeHandle for EnvironmentHandle {
    const KIND: HandleKind = HandleKind::Environment;

    fn is_valid(&self) -> bool {
        self.env.is_some()
    }

    fn close(&mut self) {
        // Dropping the engine environment closes it.
        self.env.take();
    }
}

impl Drop for EnvironmentHandle {
    fn drop(&mut self) {
        // Transactions and cursors keep the environment alive, so the last
        // of them to go releases it here.
        if self.is_valid() {
            debug!("releasing environment on last reference");
            self.close();
        }
    }
}

#[cfg(unix)]
fn path_to_cstring(path: &Path) -> Result<CString, StoreError> {
    use std::os::unix::ffi::OsStrExt;
    CString::new(path.as_os_str().as_bytes()).map_err(|_| StoreError::InvalidPath(path.into()))
}

#[cfg(not(unix))]
fn path_to_cstring(path: &Path) -> Result<CString, StoreError> {
    path.to_str().and_then(|p| CString::new(p).ok()).ok_or_else(|| StoreError::InvalidPath(path.into()))
}

#[cfg(test)]
mod tests {
    use tempfile::Builder;

    use super::*;

    #[test]
    fn test_close_is_idempotent() {
        let root = Builder::new().prefix("test_env_handle_close").tempdir().expect("tempdir");
        let mut env = EnvironmentHandle::open(root.path(), &EnvironmentConfig::default()).expect("env");
        assert!(env.is_valid());
        assert!(env.stat().expect("stat").page_size > 0);

        env.close();
        env.close();
        assert!(!env.is_valid());
        match env.raw() {
            Err(StoreError::ResourceClosed(HandleKind::Environment)) => (),
            other => panic!("expected a closed environment, got {:?}", other),
        }
        assert!(env.info().is_err());
        assert!(env.sync(true).is_err());
    }

    #[test]
    fn test_load_ratio_of_fresh_environment() {
        let root = Builder::new().prefix("test_env_handle_load").tempdir().expect("tempdir");
        let env = EnvironmentHandle::open(root.path(), &EnvironmentConfig::default()).expect("env");
        let ratio = env.load_ratio().expect("ratio");
        assert!(ratio > 0.0 && ratio < 1.0);
    }
}
