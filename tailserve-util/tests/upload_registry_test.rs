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

use core::sync::atomic::{AtomicUsize, Ordering};
use std::path::Path;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use tailserve_error::Code;
use tailserve_util::upload_registry::UploadRegistry;

#[test]
fn try_begin_is_exclusive_per_path() {
    let registry = UploadRegistry::new();
    let path = Path::new("/data/a.bin");
    assert!(registry.try_begin(path));
    assert!(!registry.try_begin(path));
    assert!(registry.is_active(path));

    // Unrelated paths are not affected.
    assert!(registry.try_begin(Path::new("/data/b.bin")));
    assert_eq!(registry.active_count(), 2);
}

#[test]
fn end_is_idempotent() {
    let registry = UploadRegistry::new();
    let path = Path::new("/data/a.bin");
    registry.end(path);
    assert!(registry.try_begin(path));
    registry.end(path);
    registry.end(path);
    assert!(!registry.is_active(path));
    assert!(registry.try_begin(path));
}

#[test]
fn guard_releases_on_drop() {
    let registry = UploadRegistry::new();
    let path = Path::new("/data/a.bin");
    {
        let _guard = registry.begin_upload(path).unwrap();
        assert!(registry.is_active(path));
        let err = registry.begin_upload(path).unwrap_err();
        assert_eq!(err.code, Code::AlreadyExists);
    }
    assert!(!registry.is_active(path));
    assert_eq!(registry.active_count(), 0);
}

#[test]
fn guard_releases_during_unwind() {
    let registry = UploadRegistry::new();
    let path = Path::new("/data/a.bin");
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let _guard = registry.begin_upload(path).unwrap();
        panic!("upload blew up");
    }));
    assert!(result.is_err());
    assert!(!registry.is_active(path));
}

#[test]
fn concurrent_try_begin_admits_exactly_one() {
    const THREADS: usize = 16;
    let registry = Arc::new(UploadRegistry::new());
    let admitted = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(std::sync::Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let registry = registry.clone();
            let admitted = admitted.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                if registry.try_begin(Path::new("/data/contended.bin")) {
                    admitted.fetch_add(1, Ordering::Relaxed);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(admitted.load(Ordering::Relaxed), 1);
}
