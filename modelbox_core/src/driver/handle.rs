//! Process-wide bookkeeping for open dynamic-library handles.
//!
//! A single shared object may back several driver records, and the dynamic
//! loader hands out the same handle for each open. The table keeps one entry
//! per distinct handle with two counts: how many outstanding opens the
//! registry holds (`handle_refcnt`) and how many successful initializations
//! the entry has seen (the `init` count). The map lock and the per-entry init
//! lock are never held at the same time: callers read the entry `Arc` under
//! the map lock, release it, and only then take the init lock.

use lazy_static::lazy_static;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::os::raw::c_void;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Opaque identity of a library handle returned by the dynamic loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct RawHandle(pub(crate) *mut c_void);

// The handle is an opaque token; the loader serializes all mutation of the
// library state behind it.
unsafe impl Send for RawHandle {}
unsafe impl Sync for RawHandle {}

/// Per-handle entry: open count plus init count under its own lock.
#[derive(Debug, Default)]
pub(crate) struct DriverHandlerInfo {
    handle_refcnt: AtomicU32,

    /// Guards the init count and the `DriverInit`/`DriverFini` call sites.
    pub(crate) init: Mutex<u32>,
}

impl DriverHandlerInfo {
    fn inc_handle_refcnt(&self) -> u32 {
        self.handle_refcnt.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn dec_handle_refcnt(&self) -> u32 {
        self.handle_refcnt.fetch_sub(1, Ordering::SeqCst) - 1
    }

    pub(crate) fn handle_refcnt(&self) -> u32 {
        self.handle_refcnt.load(Ordering::SeqCst)
    }
}

/// Table of open library handles, keyed by handle identity.
#[derive(Debug, Default)]
pub(crate) struct DriverHandler {
    map: Mutex<HashMap<RawHandle, Arc<DriverHandlerInfo>>>,
}

lazy_static! {
    static ref HANDLER: DriverHandler = DriverHandler::default();
}

impl DriverHandler {
    /// The process-wide table used by the driver lifecycle.
    pub(crate) fn global() -> &'static DriverHandler {
        &HANDLER
    }

    /// An isolated table for tests.
    #[cfg(test)]
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register one more open of `handle`, creating the entry on first use.
    pub(crate) fn add(&self, handle: RawHandle) -> Arc<DriverHandlerInfo> {
        let mut map = self.map.lock();
        let info = map
            .entry(handle)
            .or_insert_with(|| Arc::new(DriverHandlerInfo::default()))
            .clone();
        info.inc_handle_refcnt();
        info
    }

    pub(crate) fn get(&self, handle: RawHandle) -> Option<Arc<DriverHandlerInfo>> {
        self.map.lock().get(&handle).cloned()
    }

    /// Drop one open of `handle`; the entry is erased with the last one.
    pub(crate) fn remove(&self, handle: RawHandle) {
        let mut map = self.map.lock();
        let info = map
            .get(&handle)
            .expect("handle entry must exist until its last user removes it");
        if info.dec_handle_refcnt() == 0 {
            map.remove(&handle);
        }
    }
}
