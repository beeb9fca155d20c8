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
    collections::{
        btree_map::Entry,
        BTreeMap,
    },
    io,
    path::{
        Path,
        PathBuf,
    },
    sync::Arc,
};

use lazy_static::lazy_static;
use parking_lot::RwLock;

use crate::env::Environment;
use crate::error::StoreError;

lazy_static! {
    static ref MANAGER: RwLock<Manager> = RwLock::new(Manager::new());
}

/// A process may only have one open environment per directory. This
/// manager enforces that; don't open environments directly when more than
/// one part of a program may need the same one.
pub struct Manager {
    environments: BTreeMap<PathBuf, Arc<Environment>>,
}

impl Manager {
    fn new() -> Manager {
        Manager {
            environments: Default::default(),
        }
    }

    pub fn singleton() -> &'static RwLock<Manager> {
        &*MANAGER
    }

    /// Return the environment open at `path`, or `None` if there is none.
    pub fn get<'p, P>(&self, path: P) -> Result<Option<Arc<Environment>>, io::Error>
    where
        P: Into<&'p Path>,
    {
        let canonical = path.into().canonicalize()?;
        Ok(self.environments.get(&canonical).cloned())
    }

    /// Return the environment open at `path`, or create one by calling `f`.
    pub fn get_or_create<'p, F, P>(&mut self, path: P, f: F) -> Result<Arc<Environment>, StoreError>
    where
        F: FnOnce(&Path) -> Result<Environment, StoreError>,
        P: Into<&'p Path>,
    {
        let canonical = path.into().canonicalize()?;
        Ok(match self.environments.entry(canonical) {
            Entry::Occupied(e) => e.get().clone(),
            Entry::Vacant(e) => {
                let env = Arc::new(f(e.key().as_path())?);
                e.insert(env).clone()
            },
        })
    }

    /// Close the environment at `path` and forget it. Other holders of the
    /// `Arc` see a closed environment from then on.
    pub fn close<'p, P>(&mut self, path: P) -> Result<(), StoreError>
    where
        P: Into<&'p Path>,
    {
        let canonical = path.into().canonicalize()?;
        if let Some(env) = self.environments.remove(&canonical) {
            env.close();
        }
        Ok(())
    }
}
