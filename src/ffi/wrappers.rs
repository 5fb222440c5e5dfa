//! Connection and DNS wrapper algorithms — `spec.md` §4.3 "Connection
//! wrapper algorithm" and "DNS wrapper algorithm".
//!
//! Split in two per `spec.md` §9 ("Polymorphism over native targets"): the
//! decision dance (steps 3-5, here as [`decide_connect`]/[`decide_dns`]) is
//! plain Rust taking already-extracted host strings, so it is unit
//! testable without a JVM. The five concrete `extern "system"` wrappers
//! (one per intercepted signature, not one generic wrapper — the native
//! calling conventions differ) live below, gated behind `jvmti-sys`. They
//! extract strings from the `InetAddress`/`String` argument, walk the
//! current thread's JVM call stack via JVMTI (`capture_stack_frames`, the
//! infrastructure exemption `spec.md` §4.1 step 2 depends on), call the
//! decision function, and either delegate to the original or raise.

use crate::config::CallerTag;
use crate::error::BlockInfo;
use crate::store::ConfigurationStore;

/// `spec.md` §4.3 step 5: evaluates the connect decision given the two
/// already-extracted candidate host strings (IP via `getHostAddress`,
/// hostname via the cached `getHostName`). Either may be absent — `spec.md`
/// §7 ("platform-encoding not ready"): a failed extraction is treated as
/// "no such string", not an error.
///
/// `spec.md` steps 1-3 (VM not ready, not registered, no active
/// configuration) are the extern wrapper's concern, not this function's:
/// they gate whether this is called at all, and
/// [`ConfigurationStore::check_connection`] itself re-derives "no active
/// configuration -> quiet return" regardless, so calling this function
/// with no active configuration is always harmless.
#[must_use = "an Err must be turned into a raised exception by the caller"]
pub fn decide_connect(
    store: &ConfigurationStore,
    ip: Option<&str>,
    hostname: Option<&str>,
    port: i32,
    caller_tag: CallerTag,
    stack_frames: &[&str],
) -> Result<(), BlockInfo> {
    match (ip, hostname) {
        (None, None) => Ok(()),
        (Some(ip), None) => store.check_connection(ip, port, caller_tag, stack_frames),
        (None, Some(host)) => store.check_connection(host, port, caller_tag, stack_frames),
        (Some(ip), Some(host)) => decide_connect_both(store, ip, host, port, caller_tag, stack_frames),
    }
}

/// The four-step precedence `spec.md` §4.3 step 5 spells out when both
/// halves extracted successfully.
fn decide_connect_both(
    store: &ConfigurationStore,
    ip: &str,
    hostname: &str,
    port: i32,
    caller_tag: CallerTag,
    stack_frames: &[&str],
) -> Result<(), BlockInfo> {
    // (a) An explicit block on either half wins outright, raised against
    // whichever half matched (IP checked first — it is the connection
    // target).
    if store.is_explicitly_blocked(ip) {
        return store.check_connection(ip, port, caller_tag, stack_frames);
    }
    if store.is_explicitly_blocked(hostname) {
        return store.check_connection(hostname, port, caller_tag, stack_frames);
    }

    // (b) IP first — it is the actual connection target.
    if store.check_connection(ip, port, caller_tag, stack_frames).is_ok() {
        return Ok(());
    }

    // (c) Fall back to the hostname the resolver produced; users
    // frequently allow-list by name.
    if store
        .check_connection(hostname, port, caller_tag, stack_frames)
        .is_ok()
    {
        return Ok(());
    }

    // (d) Neither half is permitted; report the exception against the IP,
    // the connection's actual target.
    store.check_connection(ip, port, caller_tag, stack_frames)
}

/// `spec.md` §4.3 "DNS wrapper algorithm" step 4. Port is always `-1` —
/// DNS has no port, and `BlockInfo`/the decision rule tolerate it
/// verbatim.
#[must_use = "an Err must be turned into a raised exception by the caller"]
pub fn decide_dns(
    store: &ConfigurationStore,
    hostname: &str,
    stack_frames: &[&str],
) -> Result<(), BlockInfo> {
    store.check_connection(hostname, -1, CallerTag::NativeDns, stack_frames)
}

#[cfg(feature = "jvmti-sys")]
mod native {
    //! The five concrete `extern "system"` wrappers the agent installs via
    //! `NativeMethodBind`. Each extracts what it can from its JNI
    //! arguments, calls into [`super::decide_connect`]/[`super::decide_dns`],
    //! and on `Err` synthesises the pending `NetworkRequestAttempted`
    //! exception before returning the runtime's error code — `spec.md` §9
    //! "Control-flow via exceptions".
    //!
    //! These are intentionally thin: all decision logic lives in the pure
    //! functions above, leaving the unsafe surface here to argument
    //! marshaling and original-function dispatch only.

    use jni::sys::{jint, jobject, jstring, JNIEnv};
    use std::mem::transmute;

    use crate::config::CallerTag;
    use crate::ffi::state::{agent_state, original_fn_addr, InterceptTarget};
    use crate::ffi::sys;

    /// Error code returned to the runtime on block or on a missing original
    /// function pointer. Matches `java.net.SocketChannelImpl`'s own
    /// "exception pending, value ignored" convention of `-1` for the
    /// `int`-returning connect variants.
    const BLOCKED_OR_MISSING: jint = -1;

    type ConnectFn =
        unsafe extern "system" fn(JNIEnv, jobject, jint, jobject, jobject, jint) -> jint;
    type LookupFn = unsafe extern "system" fn(JNIEnv, jobject, jstring) -> jobject;

    /// Shared dispatch for the three connect-shaped targets: VM/registration
    /// short-circuits (`spec.md` §4.3 steps 1-2), the hot-path
    /// `has_active_configuration` escape (step 3, folded into
    /// [`super::decide_connect`] via [`crate::store::ConfigurationStore`]),
    /// string extraction (step 4), and dispatch (step 5-6).
    ///
    /// # Safety
    ///
    /// `env` must be a valid `JNIEnv` for the calling thread, as guaranteed
    /// by the runtime invoking this function as a bound native method.
    unsafe fn dispatch_connect(
        target: InterceptTarget,
        env: JNIEnv,
        this: jobject,
        preferred: jint,
        fd: jobject,
        remote: jobject,
        port: jint,
    ) -> jint {
        let state = agent_state();
        if !state.vm_ready() || !state.is_registered() {
            return call_original_connect(target, env, this, preferred, fd, remote, port);
        }

        let (ip, hostname) = extract_inet_address_strings(env, remote);
        if ip.is_none() && hostname.is_none() {
            return call_original_connect(target, env, this, preferred, fd, remote, port);
        }

        let frames = capture_stack_frames();
        let frame_refs: Vec<&str> = frames.iter().map(String::as_str).collect();

        let store = crate::ffi::bridge_store();
        let decision = super::decide_connect(
            store,
            ip.as_deref(),
            hostname.as_deref(),
            port,
            CallerTag::NativeAgent,
            &frame_refs,
        );
        match decision {
            Ok(()) => call_original_connect(target, env, this, preferred, fd, remote, port),
            Err(info) => {
                crate::ffi::bridge_raise(env, &info);
                state.metrics.blocked.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                BLOCKED_OR_MISSING
            }
        }
    }

    unsafe fn call_original_connect(
        target: InterceptTarget,
        env: JNIEnv,
        this: jobject,
        preferred: jint,
        fd: jobject,
        remote: jobject,
        port: jint,
    ) -> jint {
        match original_fn_addr(&agent_state().table, target) {
            Some(addr) => {
                let f: ConnectFn = transmute(addr);
                f(env, this, preferred, fd, remote, port)
            }
            None => BLOCKED_OR_MISSING,
        }
    }

    /// # Safety
    /// `env` must be a valid `JNIEnv` for the calling thread.
    unsafe fn dispatch_lookup(target: InterceptTarget, env: JNIEnv, this: jobject, host: jstring) -> jobject {
        let state = agent_state();
        if !state.vm_ready() || !state.is_registered() {
            return call_original_lookup(target, env, this, host);
        }
        let Some(hostname) = crate::ffi::jstring_to_string(env, host) else {
            return call_original_lookup(target, env, this, host);
        };

        let frames = capture_stack_frames();
        let frame_refs: Vec<&str> = frames.iter().map(String::as_str).collect();

        let store = crate::ffi::bridge_store();
        match super::decide_dns(store, &hostname, &frame_refs) {
            Ok(()) => call_original_lookup(target, env, this, host),
            Err(info) => {
                crate::ffi::bridge_raise(env, &info);
                state.metrics.blocked.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                std::ptr::null_mut()
            }
        }
    }

    unsafe fn call_original_lookup(target: InterceptTarget, env: JNIEnv, this: jobject, host: jstring) -> jobject {
        match original_fn_addr(&agent_state().table, target) {
            Some(addr) => {
                let f: LookupFn = transmute(addr);
                f(env, this, host)
            }
            None => std::ptr::null_mut(),
        }
    }

    /// Extracts `getHostAddress`/`getHostName` from a remote `InetAddress`.
    /// Each half independently degrades to `None` on extraction failure,
    /// per `spec.md` §7's "platform-encoding not ready" recovery policy —
    /// any pending exception from a failed half is cleared before
    /// returning.
    ///
    /// # Safety
    /// `env` and `remote` must be valid for the calling thread.
    unsafe fn extract_inet_address_strings(
        env: JNIEnv,
        remote: jobject,
    ) -> (Option<String>, Option<String>) {
        (
            crate::ffi::call_string_method(env, remote, "getHostAddress"),
            crate::ffi::call_string_method(env, remote, "getHostName"),
        )
    }

    /// Upper bound on frames walked per call — deep recursive call chains
    /// beyond this are vanishingly unlikely to originate the build tool's
    /// own infrastructure fetches, the only thing this walk is for.
    const MAX_STACK_FRAMES: usize = 64;

    /// Walks the current thread's JVM call stack via JVMTI `GetStackTrace`,
    /// resolving each frame's declaring class to a dotted binary name
    /// (`"org.gradle.internal...""` form) for the infrastructure-exemption
    /// check `super::decide_connect`/`super::decide_dns` pass down into
    /// [`crate::store::ConfigurationStore::is_exempt_caller`]. Returns an
    /// empty list — exactly like "no exempt frame found" — if no
    /// `jvmtiEnv` has been cached yet (`Agent_OnLoad` hasn't run, e.g. in a
    /// unit test) or any JVMTI call along the way fails.
    ///
    /// # Safety
    /// Must be called on a JVM-owned thread — true for any bound native
    /// method, since `GetStackTrace(env, NULL, ...)` walks the calling
    /// thread per the JVMTI spec.
    unsafe fn capture_stack_frames() -> Vec<String> {
        let jvmti_ptr = agent_state().jvmti_env();
        if jvmti_ptr == 0 {
            return Vec::new();
        }
        let jvmti_env = jvmti_ptr as *mut sys::jvmtiEnv;

        let Some(get_stack_trace) = (*(*jvmti_env)).GetStackTrace else {
            return Vec::new();
        };
        let Some(get_declaring_class) = (*(*jvmti_env)).GetMethodDeclaringClass else {
            return Vec::new();
        };
        let Some(get_class_signature) = (*(*jvmti_env)).GetClassSignature else {
            return Vec::new();
        };
        let deallocate = (*(*jvmti_env)).Deallocate;

        let mut frames: [sys::jvmtiFrameInfo; MAX_STACK_FRAMES] = std::mem::zeroed();
        let mut count: sys::jint = 0;
        let rc = get_stack_trace(
            jvmti_env,
            std::ptr::null_mut(),
            0,
            MAX_STACK_FRAMES as sys::jint,
            frames.as_mut_ptr(),
            &mut count,
        );
        if rc != sys::JVMTI_ERROR_NONE as sys::jvmtiError || count < 0 {
            return Vec::new();
        }

        let mut out = Vec::with_capacity(count as usize);
        for frame in &frames[..count as usize] {
            let mut declaring_class = std::ptr::null_mut();
            if get_declaring_class(jvmti_env, frame.method, &mut declaring_class)
                != sys::JVMTI_ERROR_NONE as sys::jvmtiError
            {
                continue;
            }
            let mut signature: *mut std::os::raw::c_char = std::ptr::null_mut();
            if get_class_signature(jvmti_env, declaring_class, &mut signature, std::ptr::null_mut())
                != sys::JVMTI_ERROR_NONE as sys::jvmtiError
            {
                continue;
            }
            if let Some(sig) = cstr_to_owned(signature) {
                out.push(jvm_signature_to_dotted_name(&sig));
            }
            if let Some(dealloc) = deallocate {
                dealloc(jvmti_env, signature as *mut std::os::raw::c_uchar);
            }
        }
        out
    }

    unsafe fn cstr_to_owned(ptr: *const std::os::raw::c_char) -> Option<String> {
        if ptr.is_null() {
            return None;
        }
        Some(std::ffi::CStr::from_ptr(ptr).to_string_lossy().into_owned())
    }

    /// Converts a JVMTI class signature (`"Lcom/example/Foo;"`) to the
    /// dotted binary-name form (`"com.example.Foo"`) the infra-exemption
    /// substring check matches against. Array and primitive signatures
    /// (which never name an infrastructure class) pass through unchanged —
    /// they simply never match any exemption substring.
    fn jvm_signature_to_dotted_name(sig: &str) -> String {
        sig.strip_prefix('L')
            .and_then(|s| s.strip_suffix(';'))
            .map(|s| s.replace('/', "."))
            .unwrap_or_else(|| sig.to_string())
    }

    /// `sun.nio.ch.Net.connect0`.
    ///
    /// # Safety
    /// Called only by the runtime as a bound native method with a valid
    /// `JNIEnv` for the calling thread.
    pub unsafe extern "system" fn nio_net_connect0(
        env: JNIEnv,
        this: jobject,
        preferred: jint,
        fd: jobject,
        remote: jobject,
        port: jint,
    ) -> jint {
        dispatch_connect(InterceptTarget::NioNetConnect0, env, this, preferred, fd, remote, port)
    }

    /// `sun.nio.ch.SocketChannelImpl.connect0`.
    ///
    /// # Safety
    /// See [`nio_net_connect0`].
    pub unsafe extern "system" fn socket_channel_impl_connect0(
        env: JNIEnv,
        this: jobject,
        preferred: jint,
        fd: jobject,
        remote: jobject,
        port: jint,
    ) -> jint {
        dispatch_connect(
            InterceptTarget::SocketChannelImplConnect0,
            env,
            this,
            preferred,
            fd,
            remote,
            port,
        )
    }

    /// `java.net.Socket.socketConnect0` (legacy pre-NIO2 stack).
    ///
    /// # Safety
    /// See [`nio_net_connect0`].
    pub unsafe extern "system" fn legacy_socket_connect0(
        env: JNIEnv,
        this: jobject,
        preferred: jint,
        fd: jobject,
        remote: jobject,
        port: jint,
    ) -> jint {
        dispatch_connect(InterceptTarget::LegacySocketConnect0, env, this, preferred, fd, remote, port)
    }

    /// `java.net.Inet6AddressImpl.lookupAllHostAddr`.
    ///
    /// # Safety
    /// See [`nio_net_connect0`].
    pub unsafe extern "system" fn inet6_lookup_all_host_addr(
        env: JNIEnv,
        this: jobject,
        host: jstring,
    ) -> jobject {
        dispatch_lookup(InterceptTarget::Inet6LookupAllHostAddr, env, this, host)
    }

    /// `java.net.Inet4AddressImpl.lookupAllHostAddr`.
    ///
    /// # Safety
    /// See [`nio_net_connect0`].
    pub unsafe extern "system" fn inet4_lookup_all_host_addr(
        env: JNIEnv,
        this: jobject,
        host: jstring,
    ) -> jobject {
        dispatch_lookup(InterceptTarget::Inet4LookupAllHostAddr, env, this, host)
    }
}

#[cfg(feature = "jvmti-sys")]
pub use native::{
    inet4_lookup_all_host_addr, inet6_lookup_all_host_addr, legacy_socket_connect0,
    nio_net_connect0, socket_channel_impl_connect0,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfiguration;

    fn store_with(cfg: NetworkConfiguration) -> ConfigurationStore {
        let store = ConfigurationStore::default();
        store.set_configuration(cfg);
        store
    }

    #[test]
    fn both_halves_missing_is_ok_scenario_no_extraction() {
        let store = store_with(NetworkConfiguration::empty());
        assert!(decide_connect(&store, None, None, 80, CallerTag::NativeAgent, &[]).is_ok());
    }

    #[test]
    fn ip_only_uses_ip_p1() {
        let store = store_with(NetworkConfiguration::empty());
        let err = decide_connect(&store, Some("203.0.113.1"), None, 80, CallerTag::NativeAgent, &[])
            .unwrap_err();
        assert_eq!(err.host(), "203.0.113.1");
    }

    #[test]
    fn explicit_block_on_hostname_wins_even_if_ip_unmatched() {
        let store = store_with(NetworkConfiguration::builder().block("evil.example.com").build());
        let err = decide_connect(
            &store,
            Some("203.0.113.1"),
            Some("evil.example.com"),
            443,
            CallerTag::NativeAgent,
            &[],
        )
        .unwrap_err();
        assert_eq!(err.host(), "evil.example.com");
    }

    #[test]
    fn ip_allowed_short_circuits_before_hostname_considered() {
        let store = store_with(NetworkConfiguration::builder().allow("203.0.113.1").build());
        assert!(decide_connect(
            &store,
            Some("203.0.113.1"),
            Some("unlisted.example.com"),
            80,
            CallerTag::NativeAgent,
            &[],
        )
        .is_ok());
    }

    #[test]
    fn hostname_allow_rescues_blocked_ip_fallback() {
        let store = store_with(NetworkConfiguration::builder().allow("api.example.com").build());
        assert!(decide_connect(
            &store,
            Some("203.0.113.1"),
            Some("api.example.com"),
            80,
            CallerTag::NativeAgent,
            &[],
        )
        .is_ok());
    }

    #[test]
    fn neither_half_allowed_raises_against_ip() {
        let store = store_with(NetworkConfiguration::empty());
        let err = decide_connect(
            &store,
            Some("203.0.113.1"),
            Some("unlisted.example.com"),
            80,
            CallerTag::NativeAgent,
            &[],
        )
        .unwrap_err();
        assert_eq!(err.host(), "203.0.113.1");
    }

    #[test]
    fn dns_uses_native_dns_tag_and_negative_port_p10() {
        let store = store_with(NetworkConfiguration::empty());
        let err = decide_dns(&store, "example.com", &[]).unwrap_err();
        assert_eq!(err.port(), -1);
        assert_eq!(err.caller_tag(), CallerTag::NativeDns);
    }

    #[test]
    fn dns_allowed_host_raises_nothing() {
        let store = store_with(NetworkConfiguration::builder().allow("example.com").build());
        assert!(decide_dns(&store, "example.com", &[]).is_ok());
    }
}
