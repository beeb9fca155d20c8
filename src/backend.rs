// Copyright 2018-2019 Mozilla
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

//! Owned wrappers around the engine's opaque handles. Every wrapper knows
//! whether it is still valid, refuses to touch the engine once it is not,
//! and releases itself at most once.

mod common;
mod impl_lmdb;
mod traits;

pub use common::*;
pub(crate) use traits::*;

pub(crate) use impl_lmdb::{
    CursorHandle,
    DatabaseHandle,
    EnvironmentHandle,
    TxnHandle,
};
