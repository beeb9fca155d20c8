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
    path::PathBuf,
};

use thiserror::Error;

use crate::backend::HandleKind;

/// The coarse classes every `StoreError` falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// An operation was attempted on a disposed or invalid handle.
    ResourceClosed,
    /// The operation is not legal in the current lifecycle state.
    InvalidState,
    /// The engine (or the filesystem under it) reported a failure.
    NativeFailure,
    /// A write job was rejected because its environment closed first.
    Cancelled,
    /// A buffer view was read past its declared length.
    BoundsViolation,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} handle is closed")]
    ResourceClosed(HandleKind),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("lmdb error: {0}")]
    Native(#[from] lmdb::Error),

    #[error("environment closed before the write job ran")]
    Cancelled,

    #[error("read of {size} bytes at offset {offset} exceeds buffer of {len} bytes")]
    BoundsViolation {
        offset: usize,
        size: usize,
        len: usize,
    },

    #[error("directory does not exist: {0:?}")]
    DirectoryDoesNotExist(PathBuf),

    #[error("path is not usable by the engine: {0:?}")]
    InvalidPath(PathBuf),

    #[error("database belongs to another environment")]
    ForeignDatabase,

    #[error("write job panicked; its transaction was aborted")]
    JobPanicked,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StoreError {
    pub(crate) fn invalid_state<S: Into<String>>(message: S) -> StoreError {
        StoreError::InvalidState(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::ResourceClosed(_) => ErrorKind::ResourceClosed,
            StoreError::InvalidState(_) | StoreError::ForeignDatabase | StoreError::JobPanicked => {
                ErrorKind::InvalidState
            },
            StoreError::Native(_)
            | StoreError::DirectoryDoesNotExist(_)
            | StoreError::InvalidPath(_)
            | StoreError::Io(_) => ErrorKind::NativeFailure,
            StoreError::Cancelled => ErrorKind::Cancelled,
            StoreError::BoundsViolation {
                ..
            } => ErrorKind::BoundsViolation,
        }
    }

    /// The engine status code behind this error, if there is one.
    pub fn native_code(&self) -> Option<i32> {
        match self {
            StoreError::Native(e) => Some(e.to_err_code()),
            _ => None,
        }
    }
}

/// Turn a raw engine status into a `Result`, keeping the code verbatim.
pub(crate) fn lmdb_result(code: std::os::raw::c_int) -> Result<(), StoreError> {
    if code == 0 {
        Ok(())
    } else {
        Err(StoreError::Native(lmdb::Error::from_err_code(code)))
    }
}
