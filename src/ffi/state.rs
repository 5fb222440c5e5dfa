//! Process-wide native-agent state — `spec.md` §3 "Process-wide state of
//! the store" and §5's three justified global-mutable-state holders.
//!
//! Everything here is either a monotone atomic or an "initialise-once,
//! read-many" holder, per `spec.md` §9: "no dynamic mutation after init."
//! None of it touches raw pointers directly enough to need `unsafe`; the
//! few places that must reinterpret a stored `usize` as a function pointer
//! live in [`super::wrappers`] and [`super::hooks`] instead, kept as close
//! as possible to the one call site that dereferences them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use parking_lot::RwLock;

/// The five native-method identities `spec.md` §4.3 hard-codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterceptTarget {
    /// `sun.nio.ch.Net.connect0(bool, FileDescriptor, InetAddress, int) -> int`
    NioNetConnect0,
    /// `sun.nio.ch.SocketChannelImpl.connect0(...)`
    SocketChannelImplConnect0,
    /// `java.net.Socket.socketConnect0(...)` — legacy.
    LegacySocketConnect0,
    /// `java.net.Inet6AddressImpl.lookupAllHostAddr(String) -> InetAddress[]`
    Inet6LookupAllHostAddr,
    /// `java.net.Inet4AddressImpl.lookupAllHostAddr(String) -> InetAddress[]`
    Inet4LookupAllHostAddr,
}

impl InterceptTarget {
    /// Matches a `(class signature, method name, method signature)` triple
    /// against the hard-coded table. Returns `None` for anything not
    /// intercepted — the common case for the vast majority of
    /// `NativeMethodBind` events a JVM fires during startup.
    #[must_use]
    pub fn from_binding(class_sig: &str, method_name: &str, method_sig: &str) -> Option<Self> {
        match (class_sig, method_name, method_sig) {
            ("Lsun/nio/ch/Net;", "connect0", _) => Some(Self::NioNetConnect0),
            ("Lsun/nio/ch/SocketChannelImpl;", "connect0", _) => {
                Some(Self::SocketChannelImplConnect0)
            }
            ("Ljava/net/Socket;", "socketConnect0", _) => Some(Self::LegacySocketConnect0),
            ("Ljava/net/Inet6AddressImpl;", "lookupAllHostAddr", _) => {
                Some(Self::Inet6LookupAllHostAddr)
            }
            ("Ljava/net/Inet4AddressImpl;", "lookupAllHostAddr", _) => {
                Some(Self::Inet4LookupAllHostAddr)
            }
            _ => None,
        }
    }

    /// `true` for the two DNS-shaped targets, `false` for the three
    /// connect-shaped ones — selects which wrapper algorithm applies.
    #[must_use]
    pub const fn is_dns(self) -> bool {
        matches!(self, Self::Inet6LookupAllHostAddr | Self::Inet4LookupAllHostAddr)
    }
}

/// Per-target bind state, `spec.md` §4.3's state machine:
/// `Unbound -> Bound(original_fn, wrapper_active=false) -> Bound(original_fn, wrapper_active=true)`.
#[derive(Debug, Clone, Copy)]
pub struct BindState {
    /// The runtime-supplied original implementation, recorded once at bind
    /// time. Stored as a raw address rather than a typed function pointer
    /// because the five targets have four distinct C-ABI signatures; the
    /// wrapper that calls it is the one place that knows which to cast to.
    pub original_fn: usize,
    /// Flips to `true` on `VMInit`. Wrappers dispatch only once this and
    /// the process-wide VM-ready flag are both true.
    pub wrapper_active: bool,
}

/// The intercepted-method table — append-only for the life of the
/// process, per `spec.md` §3. Keyed by [`InterceptTarget`] rather than the
/// raw class/method/signature triple, since the table only ever holds the
/// five hard-coded targets.
#[derive(Debug, Default)]
pub struct InterceptedMethodTable {
    entries: RwLock<HashMap<InterceptTarget, BindState>>,
}

impl InterceptedMethodTable {
    /// Records a bind event. Called exactly once per target, from
    /// `NativeMethodBind` (the runtime guarantees single-threaded
    /// invocation per class load, per `spec.md` §5).
    pub fn record_bind(&self, target: InterceptTarget, original_fn: usize) {
        self.entries.write().insert(
            target,
            BindState {
                original_fn,
                wrapper_active: false,
            },
        );
    }

    /// Flips every recorded target's `wrapper_active` to `true`. Called
    /// once from `VMInit`.
    pub fn activate_all(&self) {
        for state in self.entries.write().values_mut() {
            state.wrapper_active = true;
        }
    }

    /// Looks up the current bind state for `target`.
    #[must_use]
    pub fn get(&self, target: InterceptTarget) -> Option<BindState> {
        self.entries.read().get(&target).copied()
    }
}

/// Cached references into the managed runtime — the configuration store's
/// class object and the method handles for `check_connection`,
/// `is_explicitly_blocked`, and `has_active_configuration`. Populated
/// exactly once by `register_with_agent`, per `spec.md` §3/§4.3.
///
/// Stored as opaque `usize` global-reference addresses rather than typed
/// `jni` handles: this struct is reachable from plain Rust code (tests
/// exercise [`AgentState::is_registered`] without a JVM), and the actual
/// `jni::JNIEnv` calls live entirely in [`super::hooks`].
#[derive(Debug, Default, Clone, Copy)]
pub struct CachedHandles {
    pub class_ref: usize,
    pub check_connection: usize,
    pub is_explicitly_blocked: usize,
    pub has_active_configuration: usize,
}

/// Diagnostic counters, ambient per `SPEC_FULL.md` §5 — never consulted by
/// the decision rule itself.
#[derive(Debug, Default)]
pub struct Metrics {
    pub allowed: AtomicU64,
    pub blocked: AtomicU64,
    pub exempted: AtomicU64,
    pub fallback_degraded: AtomicU64,
}

/// All process-wide native-agent state in one place, so [`super::entry`]
/// has exactly one global to initialise.
#[derive(Debug, Default)]
pub struct AgentState {
    vm_ready: AtomicBool,
    registered: AtomicBool,
    handles: RwLock<CachedHandles>,
    /// The process's single `jvmtiEnv*`, cached as a `usize` at
    /// `Agent_OnLoad` so the native-method wrappers — which only ever
    /// receive a `JNIEnv`, never a `jvmtiEnv` — can still stack-walk via
    /// JVMTI for the infrastructure exemption (`spec.md` §4.1 step 2).
    /// Zero means "not yet acquired".
    jvmti_env: AtomicUsize,
    pub table: InterceptedMethodTable,
    pub metrics: Metrics,
}

impl AgentState {
    /// `spec.md` §4.3 VMInit step 3: "Setting a process-wide 'VM ready'
    /// flag consulted by the wrappers."
    pub fn mark_vm_ready(&self) {
        self.vm_ready.store(true, Ordering::Release);
        self.table.activate_all();
    }

    #[must_use]
    pub fn vm_ready(&self) -> bool {
        self.vm_ready.load(Ordering::Acquire)
    }

    /// Populates the cached handles. Idempotent-by-construction: called
    /// once from `register_with_agent`; a second call simply overwrites,
    /// since the runtime only ever calls it once.
    pub fn register(&self, handles: CachedHandles) {
        *self.handles.write() = handles;
        self.registered.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn handles(&self) -> CachedHandles {
        *self.handles.read()
    }

    /// Caches the process's `jvmtiEnv*`, stashed as a `usize`. Called once
    /// from `Agent_OnLoad` after the pointer is successfully acquired.
    pub fn set_jvmti_env(&self, ptr: usize) {
        self.jvmti_env.store(ptr, Ordering::Release);
    }

    /// The cached `jvmtiEnv*`, or `0` if `Agent_OnLoad` hasn't run yet (or
    /// failed to acquire one).
    #[must_use]
    pub fn jvmti_env(&self) -> usize {
        self.jvmti_env.load(Ordering::Acquire)
    }
}

/// The address a target's bind callback stashed in the intercepted-method
/// table, reinterpreted as a connect-shaped or DNS-shaped function
/// pointer by the caller. Kept as a free function (rather than a method on
/// [`BindState`]) so the `unsafe` transmute stays visible at the call site
/// in [`super::wrappers`].
#[must_use]
pub fn original_fn_addr(table: &InterceptedMethodTable, target: InterceptTarget) -> Option<usize> {
    table.get(target).map(|s| s.original_fn)
}

static AGENT_STATE: AgentState = AgentState {
    vm_ready: AtomicBool::new(false),
    registered: AtomicBool::new(false),
    handles: RwLock::new(CachedHandles {
        class_ref: 0,
        check_connection: 0,
        is_explicitly_blocked: 0,
        has_active_configuration: 0,
    }),
    jvmti_env: AtomicUsize::new(0),
    table: InterceptedMethodTable {
        entries: RwLock::new(HashMap::new()),
    },
    metrics: Metrics {
        allowed: AtomicU64::new(0),
        blocked: AtomicU64::new(0),
        exempted: AtomicU64::new(0),
        fallback_degraded: AtomicU64::new(0),
    },
};

/// The single process-wide [`AgentState`]. A `static` rather than a
/// `OnceLock`: every field is itself independently initialisable at
/// compile time, so there is no runtime first-use race to guard against.
#[must_use]
pub fn agent_state() -> &'static AgentState {
    &AGENT_STATE
}
