//! The configuration store — component A, `spec.md` §4.1.
//!
//! Holds the active [`NetworkConfiguration`] for the calling thread,
//! answers matching queries, and recognises infrastructure callers. The
//! store itself is safe, FFI-free Rust; [`crate::ffi`] is the only module
//! that calls into it from native hooks.

use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::{CallerTag, LoopbackPolicy, NetworkConfiguration, LOOPBACK_ALIASES};
use crate::error::BlockInfo;

/// Process-wide, rarely-changed knobs for the store.
///
/// Everything here is "one writer at construction, many readers forever" —
/// the same shape `spec.md` §9 calls out for `current_generation`, the
/// intercepted-method table, and the cached method handles.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Resolves the `spec.md` §9 Open Question about loopback handling.
    pub loopback_policy: LoopbackPolicy,
    /// Class-name substrings that exempt a caller from enforcement when any
    /// stack frame's class name contains one of them (`spec.md` §4.1
    /// "Infrastructure exemption"). Case-sensitive substring match.
    pub infra_exemptions: Vec<String>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            loopback_policy: LoopbackPolicy::default(),
            // A known testing-framework variant's instrumented-platform-JAR
            // fetcher, per spec.md §4.1's shipped default.
            infra_exemptions: vec![
                "org.gradle.internal.resource.transport.http".to_string(),
            ],
        }
    }
}

#[derive(Clone)]
struct Slot {
    configuration: NetworkConfiguration,
    generation: u64,
}

thread_local! {
    static SLOT: RefCell<Option<Slot>> = const { RefCell::new(None) };
}

/// The thread-scoped decision engine.
///
/// Holds no per-thread state itself (that lives in `thread_local!` storage,
/// shared process-wide by construction); what it owns is the monotonic
/// generation counter and the process-wide options. A process typically has
/// exactly one of these, reachable from [`crate::ffi`] via a
/// `OnceLock`-style static, but the type itself has no hidden global state
/// and is free to construct in tests.
pub struct ConfigurationStore {
    current_generation: AtomicU64,
    options: RwLock<Arc<StoreOptions>>,
}

impl Default for ConfigurationStore {
    fn default() -> Self {
        Self::new(StoreOptions::default())
    }
}

impl ConfigurationStore {
    /// Builds a store with the given options.
    #[must_use]
    pub fn new(options: StoreOptions) -> Self {
        Self {
            current_generation: AtomicU64::new(0),
            options: RwLock::new(Arc::new(options)),
        }
    }

    /// Replaces the store's options. Used by the doctor CLI and tests; the
    /// production agent load path has no runtime configuration surface for
    /// these (`spec.md` §6).
    pub fn set_options(&self, options: StoreOptions) {
        *self.options.write() = Arc::new(options);
    }

    fn options(&self) -> Arc<StoreOptions> {
        Arc::clone(&self.options.read())
    }

    /// Stamps `cfg.generation` with the store's current generation and
    /// installs it in the calling thread's slot.
    pub fn set_configuration(&self, cfg: NetworkConfiguration) {
        let generation = self.current_generation.load(Ordering::Acquire);
        let cfg = cfg.with_generation(generation);
        SLOT.with(|slot| {
            *slot.borrow_mut() = Some(Slot {
                configuration: cfg,
                generation,
            });
        });
    }

    /// Advances the generation counter and removes the calling thread's
    /// slot. Any child thread still holding the old generation reads
    /// `none` on its next [`Self::get_configuration`] — there is no eager
    /// walk of children, per `spec.md` §4.1.
    pub fn clear_configuration(&self) {
        self.current_generation.fetch_add(1, Ordering::AcqRel);
        SLOT.with(|slot| {
            *slot.borrow_mut() = None;
        });
    }

    /// Returns the calling thread's configuration, iff its stamped
    /// generation still matches the store's current generation. Never
    /// falls back to a process-wide configuration — see `spec.md` §9 for
    /// why that fallback was removed from an earlier design.
    #[must_use]
    pub fn get_configuration(&self) -> Option<NetworkConfiguration> {
        let current = self.current_generation.load(Ordering::Acquire);
        SLOT.with(|slot| {
            let slot = slot.borrow();
            slot.as_ref().and_then(|s| {
                (s.generation == current).then(|| s.configuration.clone())
            })
        })
    }

    /// `true` iff [`Self::get_configuration`] is non-`None`. The fast
    /// escape native callers take when a test isn't under enforcement —
    /// `spec.md` §4.3 calls this out as the hot path: a no-configuration
    /// test method should incur only this one boolean call.
    #[must_use]
    pub fn has_active_configuration(&self) -> bool {
        self.get_configuration().is_some()
    }

    /// `true` iff `host` matches any pattern in the active configuration's
    /// `block_patterns`. `false`, not an error, when there is no active
    /// configuration.
    #[must_use]
    pub fn is_explicitly_blocked(&self, host: &str) -> bool {
        self.get_configuration()
            .is_some_and(|cfg| cfg.is_explicitly_blocked(host))
    }

    /// The full decision rule, `spec.md` §4.1, steps 1–6.
    ///
    /// `stack_frames` is the caller's materialized Java call stack (class
    /// names, most-recent first), used only for the infrastructure
    /// exemption check. Passing an empty slice disables the exemption,
    /// which is exactly correct for call sites (tests, the doctor CLI) that
    /// have no JVM stack to walk.
    pub fn check_connection(
        &self,
        host: &str,
        port: i32,
        caller_tag: CallerTag,
        stack_frames: &[&str],
    ) -> Result<(), BlockInfo> {
        // Step 1: no active configuration -> quiet return.
        let Some(cfg) = self.get_configuration() else {
            return Ok(());
        };

        // Step 2: infrastructure exemption.
        if self.is_exempt_caller(stack_frames) {
            return Ok(());
        }

        // Step 3: explicit block always wins.
        if cfg.is_explicitly_blocked(host) {
            return Err(BlockInfo::new(host, port, caller_tag));
        }

        // Step 4: loopback default, only reachable once step 3 has cleared.
        if is_loopback_alias(host) {
            match self.options().loopback_policy {
                LoopbackPolicy::PermissiveByDefault => return Ok(()),
                LoopbackPolicy::RequireExplicitAllow => {
                    if cfg.is_explicitly_allowed(host) {
                        return Ok(());
                    }
                    return Err(BlockInfo::new(host, port, caller_tag));
                }
            }
        }

        // Step 5: explicit allow.
        if cfg.is_explicitly_allowed(host) {
            return Ok(());
        }

        // Step 6: default deny.
        Err(BlockInfo::new(host, port, caller_tag))
    }

    fn is_exempt_caller(&self, stack_frames: &[&str]) -> bool {
        let options = self.options();
        stack_frames.iter().any(|frame| {
            options
                .infra_exemptions
                .iter()
                .any(|needle| frame.contains(needle.as_str()))
        })
    }

    /// Snapshots the calling thread's active configuration (if any) and
    /// spawns `f` on a new OS thread with that snapshot installed in its
    /// slot before `f` runs, stamped with the generation current at spawn
    /// time.
    ///
    /// Rust has no equivalent of Java's `InheritableThreadLocal`, so
    /// `std::thread::spawn` alone does not satisfy `spec.md` §4.5's "any
    /// direct child thread spawned by T inherits the configuration."
    /// Anything in this crate that spawns a thread on behalf of test code
    /// must go through this helper instead of `std::thread::spawn`
    /// directly to preserve P6.
    pub fn spawn_inherited<F, T>(self: &Arc<Self>, f: F) -> std::thread::JoinHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let inherited = SLOT.with(std::cell::RefCell::borrow).clone();
        let store = Arc::clone(self);
        std::thread::spawn(move || {
            if let Some(slot) = inherited {
                SLOT.with(|local| *local.borrow_mut() = Some(slot));
            }
            let _store = store; // keep the store alive for the child's lifetime
            f()
        })
    }
}

fn is_loopback_alias(host: &str) -> bool {
    LOOPBACK_ALIASES.contains(&host)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfiguration;

    fn store() -> ConfigurationStore {
        ConfigurationStore::new(StoreOptions::default())
    }

    #[test]
    fn no_configuration_means_no_enforcement_p8() {
        let store = store();
        assert!(store
            .check_connection("anything.example.com", 80, CallerTag::NativeAgent, &[])
            .is_ok());
        assert!(!store.has_active_configuration());
    }

    #[test]
    fn unmatched_host_is_blocked_p1() {
        let store = store();
        store.set_configuration(NetworkConfiguration::empty());
        let err = store
            .check_connection("example.com", 80, CallerTag::NativeAgent, &[])
            .unwrap_err();
        assert_eq!(err.host(), "example.com");
    }

    #[test]
    fn allow_listed_host_passes_p2() {
        let store = store();
        store.set_configuration(
            NetworkConfiguration::builder().allow("example.com").build(),
        );
        assert!(store
            .check_connection("example.com", 80, CallerTag::NativeAgent, &[])
            .is_ok());
    }

    #[test]
    fn block_beats_allow_p3() {
        let store = store();
        store.set_configuration(
            NetworkConfiguration::builder()
                .allow("*")
                .block("evil.com")
                .build(),
        );
        assert!(store
            .check_connection("evil.com", 80, CallerTag::NativeAgent, &[])
            .is_err());
        assert!(store
            .check_connection("example.com", 80, CallerTag::NativeAgent, &[])
            .is_ok());
    }

    #[test]
    fn loopback_permitted_by_default_p4() {
        let store = store();
        store.set_configuration(NetworkConfiguration::empty());
        for host in LOOPBACK_ALIASES {
            assert!(store
                .check_connection(host, 80, CallerTag::NativeAgent, &[])
                .is_ok());
        }
    }

    #[test]
    fn loopback_can_still_be_explicitly_blocked() {
        let store = store();
        store.set_configuration(
            NetworkConfiguration::builder().block("localhost").build(),
        );
        assert!(store
            .check_connection("localhost", 80, CallerTag::NativeAgent, &[])
            .is_err());
    }

    #[test]
    fn require_explicit_allow_policy_blocks_unlisted_loopback() {
        let store = ConfigurationStore::new(StoreOptions {
            loopback_policy: LoopbackPolicy::RequireExplicitAllow,
            ..StoreOptions::default()
        });
        store.set_configuration(NetworkConfiguration::empty());
        assert!(store
            .check_connection("127.0.0.1", 80, CallerTag::NativeAgent, &[])
            .is_err());

        store.set_configuration(
            NetworkConfiguration::builder().allow("127.0.0.1").build(),
        );
        assert!(store
            .check_connection("127.0.0.1", 80, CallerTag::NativeAgent, &[])
            .is_ok());
    }

    #[test]
    fn clear_configuration_invalidates_generation_p6() {
        let store = store();
        store.set_configuration(NetworkConfiguration::empty());
        assert!(store.has_active_configuration());
        store.clear_configuration();
        assert!(!store.has_active_configuration());
        assert!(store.get_configuration().is_none());
    }

    #[test]
    fn infra_exemption_bypasses_active_block() {
        let store = ConfigurationStore::new(StoreOptions {
            infra_exemptions: vec!["gradle.wrapper.ArtifactFetcher".to_string()],
            ..StoreOptions::default()
        });
        store.set_configuration(NetworkConfiguration::empty());
        let frames = ["com.example.Test", "gradle.wrapper.ArtifactFetcher"];
        assert!(store
            .check_connection("example.com", 80, CallerTag::NativeAgent, &frames)
            .is_ok());
    }

    #[test]
    fn caller_tag_appears_verbatim_in_message_p10() {
        let store = store();
        store.set_configuration(NetworkConfiguration::empty());
        let err = store
            .check_connection("example.com", -1, CallerTag::NativeDns, &[])
            .unwrap_err();
        assert!(err.to_string().contains("Native-DNS"));
    }

    #[test]
    fn spawn_inherited_propagates_then_generation_invalidates_scenario_6() {
        let store = Arc::new(store());
        store.set_configuration(NetworkConfiguration::empty());

        let child_store = Arc::clone(&store);
        let handle = store.spawn_inherited(move || {
            assert!(child_store.has_active_configuration());
            child_store.clear_configuration();
            assert!(child_store.get_configuration().is_none());
        });
        handle.join().unwrap();
    }

    #[test]
    fn thread_spawned_before_set_configuration_does_not_inherit() {
        let store = Arc::new(store());
        let child_store = Arc::clone(&store);
        // No configuration yet: spawn_inherited has nothing to propagate.
        let handle = store.spawn_inherited(move || child_store.has_active_configuration());
        assert!(!handle.join().unwrap());
    }
}
