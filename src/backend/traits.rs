// Copyright 2018-2019 Mozilla
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

use super::HandleKind;
use crate::error::StoreError;

pub(crate) trait NativeHandle {
    const KIND: HandleKind;

    fn is_valid(&self) -> bool;

    /// Release the native resource. Calling this on an already released
    /// handle does nothing.
    fn close(&mut self);

    fn ensure_valid(&self) -> Result<(), StoreError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(StoreError::ResourceClosed(Self::KIND))
        }
    }
}
