//! Per-test lifecycle glue — component E, `spec.md` §4.5.
//!
//! Thin wrappers a testing-framework adapter calls at test start/end. The
//! concurrency contract (direct children inherit, grandchildren spawned
//! after teardown read `none`) is enforced by the store itself; this module
//! only names the two operations adapters are expected to call.

use std::sync::Arc;

use crate::config::NetworkConfiguration;
use crate::store::ConfigurationStore;

/// Installs `cfg` on the calling (test) thread.
pub fn before_test(store: &ConfigurationStore, cfg: NetworkConfiguration) {
    store.set_configuration(cfg);
}

/// Tears down the calling thread's configuration and advances the store's
/// generation, invalidating any child thread still holding the old slot.
pub fn after_test(store: &ConfigurationStore) {
    store.clear_configuration();
}

/// Convenience wrapper for adapters that hold the store behind an `Arc` and
/// want `spawn_inherited` semantics for worker threads a test itself
/// spawns.
pub fn spawn_test_worker<F, T>(store: &Arc<ConfigurationStore>, f: F) -> std::thread::JoinHandle<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    store.spawn_inherited(f)
}
