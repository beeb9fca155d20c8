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
    collections::HashMap,
    fs,
    mem,
    os::raw::c_uint,
    path::{
        Path,
        PathBuf,
    },
    sync::Arc,
};

use lmdb::{
    DatabaseFlags,
    EnvironmentFlags,
};
use log::{
    debug,
    warn,
};
use parking_lot::{
    Mutex,
    RwLock,
};
use uuid::Uuid;

use crate::backend::{
    EnvironmentHandle,
    HandleKind,
    Info,
    Stat,
};
use crate::error::StoreError;
use crate::pool::{
    Pool,
    PoolStats,
};
use crate::readwrite::{
    Reader,
    Writer,
};
use crate::store::{
    Database,
    DatabaseOptions,
};
use crate::writer::{
    WriteFuture,
    WriteSerializer,
    WriterMetrics,
    WriterStats,
};

pub const DEFAULT_MAX_DBS: c_uint = 5;
pub const DEFAULT_MAP_SIZE: usize = 10_485_760;
pub const DEFAULT_MAX_READERS: c_uint = 126;
pub const DEFAULT_POOL_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadWrite,
    /// No writer thread is started and every write submission fails.
    ReadOnly,
}

#[derive(Debug, Clone)]
pub struct EnvironmentConfig {
    pub map_size: usize,
    pub max_dbs: c_uint,
    pub max_readers: c_uint,
    pub flags: EnvironmentFlags,
    pub access: AccessMode,
    /// Upper bound on pooled read transactions, and on pooled cursors per
    /// database.
    pub pool_capacity: usize,
    pub make_dir_if_needed: bool,
}

impl Default for EnvironmentConfig {
    fn default() -> EnvironmentConfig {
        EnvironmentConfig {
            map_size: DEFAULT_MAP_SIZE,
            max_dbs: DEFAULT_MAX_DBS,
            max_readers: DEFAULT_MAX_READERS,
            flags: EnvironmentFlags::empty(),
            access: AccessMode::ReadWrite,
            pool_capacity: DEFAULT_POOL_CAPACITY,
            make_dir_if_needed: false,
        }
    }
}

impl EnvironmentConfig {
    /// The flags handed to the engine. Read transactions move between
    /// threads through the pool, so thread-local reader slots are always off.
    pub(crate) fn native_flags(&self) -> EnvironmentFlags {
        let mut flags = self.flags | EnvironmentFlags::NO_TLS;
        if self.access == AccessMode::ReadOnly {
            flags |= EnvironmentFlags::READ_ONLY;
        }
        flags
    }
}

/// State shared by the environment, its readers, and its writer thread.
pub(crate) struct Core {
    pub(crate) id: Uuid,
    pub(crate) env: Arc<EnvironmentHandle>,
    pub(crate) pool: Pool,
    pub(crate) metrics: WriterMetrics,
    /// Held across a database open until its transaction ends.
    pub(crate) dbi_lock: Mutex<()>,
    databases: Mutex<HashMap<Option<String>, Database>>,
}

impl Core {
    pub(crate) fn cached_database(&self, name: Option<&str>) -> Option<Database> {
        self.databases.lock().get(&name.map(String::from)).cloned()
    }

    /// Record a database whose opening transaction has committed.
    pub(crate) fn remember_database(&self, db: Database) {
        self.databases.lock().entry(db.name().map(String::from)).or_insert(db);
    }
}

struct Opened {
    core: Arc<Core>,
    writer: Option<WriteSerializer>,
}

enum State {
    Closed,
    Open(Opened),
    Disposed,
}

/// One store directory. An environment starts closed, is bound to storage
/// by `open`, and is shut down for good by `close`.
pub struct Environment {
    path: PathBuf,
    config: Mutex<EnvironmentConfig>,
    state: RwLock<State>,
}

/// Construction and configuration.
impl Environment {
    pub fn new(path: &Path) -> Environment {
        Environment::with_config(path, EnvironmentConfig::default())
    }

    pub fn with_config(path: &Path, config: EnvironmentConfig) -> Environment {
        Environment {
            path: path.into(),
            config: Mutex::new(config),
            state: RwLock::new(State::Closed),
        }
    }

    /// Return an environment at `path`, opened with the default settings.
    pub fn open_at(path: &Path) -> Result<Environment, StoreError> {
        let env = Environment::new(path);
        env.open()?;
        Ok(env)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> EnvironmentConfig {
        self.config.lock().clone()
    }

    fn configure<F>(&self, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut EnvironmentConfig),
    {
        let state = self.state.read();
        match *state {
            State::Closed => {
                f(&mut self.config.lock());
                Ok(())
            },
            State::Open(_) => Err(StoreError::invalid_state("cannot reconfigure an open environment")),
            State::Disposed => Err(StoreError::invalid_state("cannot reconfigure a closed environment")),
        }
    }

    pub fn set_map_size(&self, size: usize) -> Result<(), StoreError> {
        self.configure(|c| c.map_size = size)
    }

    pub fn set_max_dbs(&self, max_dbs: c_uint) -> Result<(), StoreError> {
        self.configure(|c| c.max_dbs = max_dbs)
    }

    pub fn set_max_readers(&self, max_readers: c_uint) -> Result<(), StoreError> {
        self.configure(|c| c.max_readers = max_readers)
    }

    pub fn set_flags(&self, flags: EnvironmentFlags) -> Result<(), StoreError> {
        self.configure(|c| c.flags = flags)
    }

    pub fn set_access_mode(&self, access: AccessMode) -> Result<(), StoreError> {
        self.configure(|c| c.access = access)
    }

    pub fn set_pool_capacity(&self, capacity: usize) -> Result<(), StoreError> {
        self.configure(|c| c.pool_capacity = capacity)
    }

    pub fn set_make_dir_if_needed(&self, make_dir: bool) -> Result<(), StoreError> {
        self.configure(|c| c.make_dir_if_needed = make_dir)
    }
}

/// Lifecycle.
impl Environment {
    /// Bind the environment to its directory and start the writer thread.
    pub fn open(&self) -> Result<(), StoreError> {
        let mut state = self.state.write();
        match *state {
            State::Closed => (),
            State::Open(_) => return Err(StoreError::invalid_state("environment is already open")),
            State::Disposed => return Err(StoreError::ResourceClosed(HandleKind::Environment)),
        }

        let config = self.config();
        if !self.path.is_dir() {
            if !config.make_dir_if_needed {
                return Err(StoreError::DirectoryDoesNotExist(self.path.clone()));
            }
            fs::create_dir_all(&self.path)?;
        }

        let handle = Arc::new(EnvironmentHandle::open(&self.path, &config).map_err(|e| match e {
            StoreError::Native(lmdb::Error::Other(2)) => StoreError::DirectoryDoesNotExist(self.path.clone()),
            e => e,
        })?);
        let core = Arc::new(Core {
            id: Uuid::new_v4(),
            pool: Pool::new(handle.clone(), config.pool_capacity),
            env: handle,
            metrics: WriterMetrics::default(),
            dbi_lock: Mutex::new(()),
            databases: Mutex::new(HashMap::new()),
        });
        let writer = match config.access {
            AccessMode::ReadWrite => Some(WriteSerializer::start(core.clone())?),
            AccessMode::ReadOnly => None,
        };

        debug!("environment {} open at {:?}", core.id, self.path);
        *state = State::Open(Opened {
            core,
            writer,
        });
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        matches!(*self.state.read(), State::Open(_))
    }

    /// Stop accepting writes, run every job already submitted, stop the
    /// writer thread, and release the pooled handles. The engine handle
    /// itself goes once the last outstanding reader is dropped.
    ///
    /// Closing is final, and closing again does nothing.
    pub fn close(&self) {
        let previous = mem::replace(&mut *self.state.write(), State::Disposed);
        if let State::Open(mut opened) = previous {
            if let Some(mut writer) = opened.writer.take() {
                writer.shutdown();
            }
            opened.core.pool.drain();
            debug!("environment {} closed", opened.core.id);
        }
    }

    pub(crate) fn core(&self) -> Result<Arc<Core>, StoreError> {
        match &*self.state.read() {
            State::Open(opened) => Ok(opened.core.clone()),
            State::Closed => Err(StoreError::invalid_state("environment is not open")),
            State::Disposed => Err(StoreError::ResourceClosed(HandleKind::Environment)),
        }
    }
}

/// Transactions.
impl Environment {
    /// Borrow a read transaction from the pool.
    pub fn begin_read(&self) -> Result<Reader, StoreError> {
        Reader::new(self.core()?)
    }

    /// Run `f` against a fresh read transaction.
    pub fn read<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Reader) -> Result<T, StoreError>,
    {
        let reader = self.begin_read()?;
        f(&reader)
    }

    /// Queue `f` to run in its own write transaction on the writer thread.
    ///
    /// Once the environment has been closed, the returned future fails with
    /// `StoreError::Cancelled`.
    pub fn submit_write<T, E, F>(&self, f: F) -> WriteFuture<T, E>
    where
        F: FnOnce(&mut Writer) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<StoreError> + Send + 'static,
    {
        match &*self.state.read() {
            State::Open(Opened {
                writer: Some(writer),
                ..
            }) => writer.submit(f),
            State::Open(_) => WriteFuture::ready(Err(E::from(StoreError::invalid_state("environment is read-only")))),
            State::Closed => WriteFuture::ready(Err(E::from(StoreError::invalid_state("environment is not open")))),
            State::Disposed => WriteFuture::ready(Err(E::from(StoreError::Cancelled))),
        }
    }

    /// Submit `f` and block until it has committed or aborted. Do not call
    /// this from inside a write job or an async runtime.
    pub fn write<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Writer) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<StoreError> + Send + 'static,
    {
        self.submit_write(f).wait()
    }

    /// Open the database `name` (`None` for the default one).
    ///
    /// Without `options.create` this runs on a read transaction and never
    /// waits for the writer, so the returned future is already complete.
    /// With it, the open runs as a write job. Inside a write job, use
    /// `Writer::open_database` instead.
    ///
    /// Non-empty `options.flags` must match the flags the database was
    /// created with, or the open fails with `lmdb::Error::Incompatible`.
    pub fn open_database<'s, T>(&self, name: T, options: DatabaseOptions) -> WriteFuture<Database, StoreError>
    where
        T: Into<Option<&'s str>>,
    {
        let name = name.into();
        let core = match self.core() {
            Ok(core) => core,
            Err(e) => return WriteFuture::ready(Err(e)),
        };
        if let Some(db) = core.cached_database(name) {
            return WriteFuture::ready(options.accept(db));
        }

        if !options.create {
            return WriteFuture::ready(open_existing(&core, name, options));
        }

        let name = name.map(String::from);
        self.submit_write(move |writer: &mut Writer| writer.open_database(name.as_deref(), options))
    }
}

fn open_existing(core: &Arc<Core>, name: Option<&str>, options: DatabaseOptions) -> Result<Database, StoreError> {
    let _guard = core.dbi_lock.lock();
    if let Some(db) = core.cached_database(name) {
        return options.accept(db);
    }

    let reader = Reader::new(core.clone())?;
    let handle = reader.open_database_handle(name, options.flags)?;
    // Committing publishes the handle to every later transaction.
    reader.commit()?;

    let db = Database::new(handle.dbi, core.id, name, DatabaseFlags::from_bits_truncate(handle.flags));
    core.remember_database(db.clone());
    options.accept(db)
}

/// Information and maintenance.
impl Environment {
    pub fn stat(&self) -> Result<Stat, StoreError> {
        self.core()?.env.stat()
    }

    pub fn info(&self) -> Result<Info, StoreError> {
        self.core()?.env.info()
    }

    /// The configured map size while closed, the live one while open.
    pub fn map_size(&self) -> Result<usize, StoreError> {
        match self.core() {
            Ok(core) => Ok(core.env.info()?.map_size),
            Err(StoreError::InvalidState(_)) => Ok(self.config.lock().map_size),
            Err(e) => Err(e),
        }
    }

    pub fn page_size(&self) -> Result<usize, StoreError> {
        Ok(self.stat()?.page_size as usize)
    }

    /// Bytes of the map in use, up to and including the last used page.
    pub fn used_size(&self) -> Result<usize, StoreError> {
        let core = self.core()?;
        let page_size = core.env.stat()?.page_size as usize;
        let info = core.env.info()?;
        Ok((info.last_pgno + 1) * page_size)
    }

    /// The share of map pages in use, free pages excluded, between 0 and 1.
    pub fn load_ratio(&self) -> Result<f32, StoreError> {
        self.core()?.env.load_ratio()
    }

    pub fn max_readers(&self) -> Result<u32, StoreError> {
        Ok(self.core()?.env.info()?.max_readers)
    }

    /// The engine cannot report this back; it is the configured value.
    pub fn max_databases(&self) -> c_uint {
        self.config.lock().max_dbs
    }

    pub fn max_key_size(&self) -> Result<usize, StoreError> {
        self.core()?.env.max_key_size()
    }

    /// Write a copy of the store into the existing directory `path`,
    /// optionally compacting free pages away.
    pub fn copy_to(&self, path: &Path, compact: bool) -> Result<(), StoreError> {
        if !path.is_dir() {
            return Err(StoreError::DirectoryDoesNotExist(path.into()));
        }
        self.core()?.env.copy_to(path, compact)
    }

    /// Flush buffers to disk. `force` syncs even when the environment was
    /// opened with relaxed durability flags.
    pub fn flush(&self, force: bool) -> Result<(), StoreError> {
        self.core()?.env.sync(force)
    }

    pub fn pool_stats(&self) -> Result<PoolStats, StoreError> {
        Ok(self.core()?.pool.stats())
    }

    pub fn writer_stats(&self) -> Result<WriterStats, StoreError> {
        Ok(self.core()?.metrics.stats())
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        if self.is_open() {
            warn!("environment at {:?} dropped while open; closing", self.path);
            self.close();
        }
    }
}
