// Copyright 2018-2019 Mozilla
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

//! A transaction layer for [LMDB](https://symas.com/lmdb/) that can be
//! shared freely between threads.
//!
//! LMDB allows one write transaction at a time and hands out pointers into
//! its memory map that are only good while their transaction lives. This
//! crate turns both rules into structure:
//!
//! * every write runs as a job on the environment's single writer thread,
//!   inside its own transaction, in submission order;
//! * read transactions and cursors are pooled, reset on release and renewed
//!   on the next use;
//! * values come back as [`BufferView`]s whose lifetime is tied to the
//!   transaction that produced them.
//!
//! ## Basic Usage
//!
//! ```
//! use rkv_txn::{DatabaseOptions, Environment, Readable, StoreError, Writer};
//! use tempfile::Builder;
//!
//! // An environment is bound to one directory. In a real program, use the
//! // `Manager` to make sure each directory is opened only once.
//! let root = Builder::new().prefix("simple-db").tempdir().unwrap();
//! let env = Environment::open_at(root.path()).unwrap();
//!
//! // Creating a database is a write, so it goes through the writer thread.
//! let db = env.open_database("store", DatabaseOptions::create()).wait().unwrap();
//!
//! // A write job gets a fresh transaction. Returning `Ok` commits it,
//! // returning `Err` aborts it.
//! let job_db = db.clone();
//! env.write(move |writer: &mut Writer| -> Result<(), StoreError> {
//!     writer.put(&job_db, "a", [1u8, 2, 3])?;
//!     writer.put_value(&job_db, "n", &42u32)?;
//!     Ok(())
//! })
//! .unwrap();
//!
//! // Reads borrow a pooled transaction.
//! let reader = env.begin_read().unwrap();
//! assert_eq!(reader.get(&db, "a").unwrap().unwrap(), [1u8, 2, 3]);
//! assert_eq!(reader.get(&db, "n").unwrap().unwrap().read::<u32>(0).unwrap(), 42);
//! drop(reader);
//!
//! // Closing runs the queued jobs to completion, then stops the writer.
//! env.close();
//! ```

mod backend;
mod cursor;
mod env;
mod error;
mod manager;
mod pool;
mod readwrite;
mod store;
mod view;
mod writer;

pub use lmdb::{
    DatabaseFlags,
    EnvironmentFlags,
    WriteFlags,
};

pub use self::backend::{
    HandleKind,
    Info,
    Stat,
};
pub use self::cursor::{
    Entry,
    Iter,
    RoCursor,
    RwCursor,
};
pub use self::env::{
    AccessMode,
    Environment,
    EnvironmentConfig,
    DEFAULT_MAP_SIZE,
    DEFAULT_MAX_DBS,
    DEFAULT_MAX_READERS,
    DEFAULT_POOL_CAPACITY,
};
pub use self::error::{
    ErrorKind,
    StoreError,
};
pub use self::manager::Manager;
pub use self::pool::PoolStats;
pub use self::readwrite::{
    Readable,
    Reader,
    Writer,
};
pub use self::store::{
    Database,
    DatabaseOptions,
};
pub use self::view::{
    BoundsCheck,
    BufferView,
    Plain,
    Scope,
};
pub use self::writer::{
    WriteFuture,
    WriterStats,
};
