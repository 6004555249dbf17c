// Copyright 2024 The NativeLink Authors. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tailserve_error::{Code, Error, make_err};
use tracing::debug;

/// Set of paths that currently have an upload writing to them. Holding an
/// entry is what makes a request the single writer of a path, and what tells
/// downloads of that path the file may still grow.
///
/// Every operation takes the lock for a single map operation, so callers never
/// need any locking of their own. A reader may still observe a path as active
/// for a moment after the writer released it; downloads re-check until the
/// entry is gone.
#[derive(Debug, Default)]
pub struct UploadRegistry {
    active_uploads: Mutex<HashSet<PathBuf>>,
}

impl UploadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `path` as being uploaded. Returns `false` without changing
    /// anything if another upload already owns it.
    pub fn try_begin(&self, path: &Path) -> bool {
        self.active_uploads.lock().insert(path.to_path_buf())
    }

    pub fn is_active(&self, path: &Path) -> bool {
        self.active_uploads.lock().contains(path)
    }

    /// Releases `path`. Releasing a path that is not registered is a no-op.
    pub fn end(&self, path: &Path) {
        self.active_uploads.lock().remove(path);
    }

    /// Number of uploads currently in flight.
    pub fn active_count(&self) -> usize {
        self.active_uploads.lock().len()
    }

    /// Same as `try_begin()`, but returns a guard that releases `path` when it
    /// is dropped, so the entry cannot outlive the upload that created it no
    /// matter how that upload exits.
    pub fn begin_upload(&self, path: &Path) -> Result<UploadGuard<'_>, Error> {
        if !self.try_begin(path) {
            return Err(make_err!(
                Code::AlreadyExists,
                "An upload to {path:?} is already in progress"
            ));
        }
        debug!(?path, "Upload registered");
        Ok(UploadGuard {
            registry: self,
            path: path.to_path_buf(),
        })
    }
}

/// Holds a path's entry in the `UploadRegistry` until dropped.
#[derive(Debug)]
#[must_use]
pub struct UploadGuard<'a> {
    registry: &'a UploadRegistry,
    path: PathBuf,
}

impl Drop for UploadGuard<'_> {
    fn drop(&mut self) {
        self.registry.end(&self.path);
        debug!(path = ?self.path, "Upload released");
    }
}
