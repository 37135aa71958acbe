//! Synchronization primitives of the dependency tracker, switched to loom's
//! model-checked versions under the `loom` feature.

#[cfg(feature = "loom")]
mod imp {
    pub(crate) use loom::sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicUsize, Ordering, fence},
    };

    pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        // loom mutexes only poison when a model thread panicked, which already
        // fails the model.
        mutex.lock().unwrap()
    }
}

#[cfg(not(feature = "loom"))]
mod imp {
    pub(crate) use core::sync::atomic::{AtomicUsize, Ordering, fence};
    pub(crate) use parking_lot::{Mutex, MutexGuard};
    pub(crate) use std::sync::Arc;

    #[inline]
    pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        mutex.lock()
    }
}

pub(crate) use imp::*;
