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

use lmdb::DatabaseFlags;
use lmdb_sys as ffi;
use uuid::Uuid;

use crate::error::StoreError;

#[derive(Default, Debug, Copy, Clone)]
pub struct DatabaseOptions {
    pub create: bool,
    pub flags: DatabaseFlags,
}

impl DatabaseOptions {
    pub fn create() -> DatabaseOptions {
        DatabaseOptions {
            create: true,
            flags: DatabaseFlags::empty(),
        }
    }

    /// Allow several sorted values per key.
    pub fn dup_sort(mut self) -> DatabaseOptions {
        self.flags.insert(DatabaseFlags::DUP_SORT);
        self
    }

    /// Duplicate values all have the same size. Implies `dup_sort`.
    pub fn dup_fixed(mut self) -> DatabaseOptions {
        self.flags.insert(DatabaseFlags::DUP_SORT | DatabaseFlags::DUP_FIXED);
        self
    }

    /// Keys are native `u32` or `usize` integers.
    pub fn integer_key(mut self) -> DatabaseOptions {
        self.flags.insert(DatabaseFlags::INTEGER_KEY);
        self
    }

    pub fn reverse_key(mut self) -> DatabaseOptions {
        self.flags.insert(DatabaseFlags::REVERSE_KEY);
        self
    }

    /// Hand `db` back if it can serve these options. Empty flags accept any
    /// database; otherwise they must equal the flags it was created with.
    pub(crate) fn accept(&self, db: Database) -> Result<Database, StoreError> {
        if self.flags.is_empty() || self.flags == db.flags() {
            Ok(db)
        } else {
            Err(lmdb::Error::Incompatible.into())
        }
    }
}

/// A table inside an environment. Once its opening transaction has
/// committed, a `Database` is usable from any later transaction on the same
/// environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Database {
    dbi: ffi::MDB_dbi,
    env_id: Uuid,
    name: Option<Arc<str>>,
    flags: DatabaseFlags,
}

impl Database {
    pub(crate) fn new(dbi: ffi::MDB_dbi, env_id: Uuid, name: Option<&str>, flags: DatabaseFlags) -> Database {
        Database {
            dbi,
            env_id,
            name: name.map(Arc::from),
            flags,
        }
    }

    /// The name it was opened with; `None` for the default database.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn flags(&self) -> DatabaseFlags {
        self.flags
    }

    pub fn allows_duplicates(&self) -> bool {
        self.flags.contains(DatabaseFlags::DUP_SORT)
    }

    pub fn has_fixed_values(&self) -> bool {
        self.flags.contains(DatabaseFlags::DUP_FIXED)
    }

    pub fn has_integer_keys(&self) -> bool {
        self.flags.contains(DatabaseFlags::INTEGER_KEY)
    }

    /// The engine slot, after checking that this database was opened by the
    /// environment `env_id`.
    pub(crate) fn dbi_for(&self, env_id: Uuid) -> Result<ffi::MDB_dbi, StoreError> {
        if self.env_id == env_id {
            Ok(self.dbi)
        } else {
            Err(StoreError::ForeignDatabase)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options() {
        let options = DatabaseOptions::default();
        assert!(!options.create);
        assert!(options.flags.is_empty());

        let options = DatabaseOptions::create().dup_fixed();
        assert!(options.create);
        assert!(options.flags.contains(DatabaseFlags::DUP_SORT));
        assert!(options.flags.contains(DatabaseFlags::DUP_FIXED));
    }

    #[test]
    fn test_accept_checks_flags() {
        let plain = Database::new(2, Uuid::new_v4(), Some("s"), DatabaseFlags::empty());
        let multi = Database::new(3, Uuid::new_v4(), Some("m"), DatabaseFlags::DUP_SORT);

        assert_eq!(DatabaseOptions::default().accept(plain.clone()).expect("any"), plain);
        assert_eq!(DatabaseOptions::default().accept(multi.clone()).expect("any"), multi);
        assert_eq!(DatabaseOptions::create().dup_sort().accept(multi.clone()).expect("same"), multi);

        match DatabaseOptions::create().dup_sort().accept(plain) {
            Err(StoreError::Native(lmdb::Error::Incompatible)) => (),
            other => panic!("expected incompatible flags, got {:?}", other),
        }
        match DatabaseOptions::create().dup_fixed().accept(multi) {
            Err(StoreError::Native(lmdb::Error::Incompatible)) => (),
            other => panic!("expected incompatible flags, got {:?}", other),
        }
    }

    #[test]
    fn test_foreign_database() {
        let owner = Uuid::new_v4();
        let db = Database::new(2, owner, Some("s"), DatabaseFlags::DUP_SORT);
        assert_eq!(db.dbi_for(owner).expect("own dbi"), 2);
        assert!(db.allows_duplicates());
        assert_eq!(db.name(), Some("s"));
        match db.dbi_for(Uuid::new_v4()) {
            Err(StoreError::ForeignDatabase) => (),
            other => panic!("expected a foreign database error, got {:?}", other),
        }
    }
}
