// Copyright 2018-2019 Mozilla
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

//! Borrowed views of engine memory.
//!
//! A `BufferView<'txn>` points straight into the memory map. The lifetime
//! ties it to the transaction that produced it, so a view cannot be read
//! once its transaction has ended or been handed back to the pool:
//!
//! ```compile_fail
//! # use rkv_txn::{DatabaseOptions, Environment, Readable};
//! # let root = tempfile::tempdir().unwrap();
//! # let env = Environment::open_at(root.path()).unwrap();
//! # let db = env.open_database(None, DatabaseOptions::default()).wait().unwrap();
//! let reader = env.begin_read().unwrap();
//! let view = reader.get(&db, "a").unwrap();
//! drop(reader);
//! println!("{:?}", view);
//! ```
//!
//! Copying data out of a transaction is always explicit, see
//! [`BufferView::to_vec`].

use std::{
    fmt,
    mem,
    ptr,
    sync::atomic::{
        AtomicU64,
        Ordering,
    },
};

use byteorder::ByteOrder;

use crate::error::StoreError;

static NEXT_SCOPE: AtomicU64 = AtomicU64::new(1);

/// Identifies one activation of one transaction. A renewed transaction gets
/// a new scope, so views taken before the renewal never compare equal to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Scope(u64);

impl Scope {
    pub(crate) fn next() -> Scope {
        Scope(NEXT_SCOPE.fetch_add(1, Ordering::Relaxed))
    }
}

/// Types that may be read from (and written as) raw bytes.
///
/// # Safety
///
/// Implementors must have no padding and no invalid bit patterns.
pub unsafe trait Plain: Copy + 'static {}

macro_rules! impl_plain {
    ($($t:ty),*) => {
        $(unsafe impl Plain for $t {})*
    };
}

impl_plain!(u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64);

unsafe impl<T: Plain, const N: usize> Plain for [T; N] {}

/// The bytes of `value` in native layout.
pub(crate) fn plain_bytes<T: Plain>(value: &T) -> &[u8] {
    unsafe { std::slice::from_raw_parts(value as *const T as *const u8, mem::size_of::<T>()) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundsCheck {
    /// Out of range reads return `StoreError::BoundsViolation`.
    Checked,
    /// The explicit length check is skipped. Out of range reads still never
    /// touch memory past the view; they panic instead of returning an error.
    Unchecked,
}

#[derive(Clone, Copy)]
pub struct BufferView<'txn> {
    bytes: &'txn [u8],
    scope: Scope,
    checks: BoundsCheck,
}

impl<'txn> BufferView<'txn> {
    pub(crate) fn new(bytes: &'txn [u8], scope: Scope) -> BufferView<'txn> {
        BufferView {
            bytes,
            scope,
            checks: BoundsCheck::Checked,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The transaction activation this view belongs to.
    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn bounds_check(&self) -> BoundsCheck {
        self.checks
    }

    /// Return the same view with explicit bounds checks turned off.
    pub fn unchecked(self) -> BufferView<'txn> {
        BufferView {
            checks: BoundsCheck::Unchecked,
            ..self
        }
    }

    pub fn as_bytes(&self) -> &'txn [u8] {
        self.bytes
    }

    /// Copy the viewed bytes into caller-owned memory.
    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.to_vec()
    }

    /// A narrower view over `len` bytes starting at `offset`.
    pub fn slice(&self, offset: usize, len: usize) -> Result<BufferView<'txn>, StoreError> {
        let bytes = self.range(offset, len)?;
        Ok(BufferView {
            bytes,
            ..*self
        })
    }

    /// Read a `T` in native layout at `offset`. The offset need not be
    /// aligned.
    pub fn read<T: Plain>(&self, offset: usize) -> Result<T, StoreError> {
        let bytes = self.range(offset, mem::size_of::<T>())?;
        Ok(unsafe { ptr::read_unaligned(bytes.as_ptr() as *const T) })
    }

    pub fn read_u16<B: ByteOrder>(&self, offset: usize) -> Result<u16, StoreError> {
        Ok(B::read_u16(self.range(offset, 2)?))
    }

    pub fn read_u32<B: ByteOrder>(&self, offset: usize) -> Result<u32, StoreError> {
        Ok(B::read_u32(self.range(offset, 4)?))
    }

    pub fn read_u64<B: ByteOrder>(&self, offset: usize) -> Result<u64, StoreError> {
        Ok(B::read_u64(self.range(offset, 8)?))
    }

    pub fn read_i32<B: ByteOrder>(&self, offset: usize) -> Result<i32, StoreError> {
        Ok(B::read_i32(self.range(offset, 4)?))
    }

    pub fn read_i64<B: ByteOrder>(&self, offset: usize) -> Result<i64, StoreError> {
        Ok(B::read_i64(self.range(offset, 8)?))
    }

    pub fn read_f64<B: ByteOrder>(&self, offset: usize) -> Result<f64, StoreError> {
        Ok(B::read_f64(self.range(offset, 8)?))
    }

    fn range(&self, offset: usize, size: usize) -> Result<&'txn [u8], StoreError> {
        match self.checks {
            BoundsCheck::Checked => {
                let end = offset.checked_add(size).filter(|end| *end <= self.bytes.len());
                match end {
                    Some(end) => Ok(&self.bytes[offset..end]),
                    None => Err(StoreError::BoundsViolation {
                        offset,
                        size,
                        len: self.bytes.len(),
                    }),
                }
            },
            BoundsCheck::Unchecked => Ok(&self.bytes[offset..offset + size]),
        }
    }
}

impl<'txn> AsRef<[u8]> for BufferView<'txn> {
    fn as_ref(&self) -> &[u8] {
        self.bytes
    }
}

impl<'txn> PartialEq<[u8]> for BufferView<'txn> {
    fn eq(&self, other: &[u8]) -> bool {
        self.bytes == other
    }
}

impl<'txn, 'a> PartialEq<&'a [u8]> for BufferView<'txn> {
    fn eq(&self, other: &&'a [u8]) -> bool {
        self.bytes == *other
    }
}

impl<'txn, const N: usize> PartialEq<[u8; N]> for BufferView<'txn> {
    fn eq(&self, other: &[u8; N]) -> bool {
        self.bytes == &other[..]
    }
}

impl<'txn, 'a, const N: usize> PartialEq<&'a [u8; N]> for BufferView<'txn> {
    fn eq(&self, other: &&'a [u8; N]) -> bool {
        self.bytes == &other[..]
    }
}

impl<'txn> fmt::Debug for BufferView<'txn> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("BufferView").field("scope", &self.scope).field("bytes", &self.bytes).finish()
    }
}
