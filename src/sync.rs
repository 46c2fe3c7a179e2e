// Copyright 2024 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Useful synchronization primitives.
//!
//! Thin wrappers around the standard-library locks that panic instead of
//! surfacing poisoning. A poisoned lock means a panic while holding the
//! interface lease, after which the guarded tables cannot be trusted.

use std::sync::{self, LockResult};

pub(crate) use sync::{MutexGuard, RwLockReadGuard, RwLockWriteGuard};

fn unpoisoned<G>(result: LockResult<G>) -> G {
    result.unwrap_or_else(|_| panic!("lock poisoned"))
}

/// A mutex that panics on poisoning.
#[derive(Debug, Default)]
pub(crate) struct Mutex<T>(sync::Mutex<T>);

impl<T> Mutex<T> {
    pub(crate) fn new(t: T) -> Self {
        Self(sync::Mutex::new(t))
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, T> {
        let Self(mutex) = self;
        unpoisoned(mutex.lock())
    }
}

/// A reader-writer lock that panics on poisoning.
#[derive(Debug, Default)]
pub(crate) struct RwLock<T>(sync::RwLock<T>);

impl<T> RwLock<T> {
    pub(crate) fn new(t: T) -> Self {
        Self(sync::RwLock::new(t))
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, T> {
        let Self(lock) = self;
        unpoisoned(lock.read())
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, T> {
        let Self(lock) = self;
        unpoisoned(lock.write())
    }
}
