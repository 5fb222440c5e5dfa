//! JVMTI event callbacks — `spec.md` §4.3.
//!
//! Everything here is `unsafe`, by construction: these are the functions
//! the host JVM calls directly, with raw `jvmtiEnv`/`JNIEnv` pointers and
//! no Rust-side guarantee beyond "the runtime invoked this exactly as its
//! own interface document promises". Kept deliberately thin — all three
//! callbacks do argument extraction and table bookkeeping only, deferring
//! to [`super::wrappers`] and [`super::classfile`] for anything that could
//! be unit tested without a live JVM.

use std::ffi::CStr;
use std::os::raw::c_char;

use crate::ffi::classfile;
use crate::ffi::state::{agent_state, InterceptTarget};
use crate::ffi::sys;

/// `spec.md` §4.3 "NativeMethodBind callback". Resolves the bound
/// method's class signature, name, and descriptor, matches against the
/// hard-coded table, and — if matched — records the original function
/// pointer and overwrites `new_address_ptr` with our wrapper's address so
/// the runtime binds that instead.
///
/// # Safety
/// Called by the JVM with valid pointers per the `jvmtiEventNativeMethodBind`
/// contract: `jni_env`/`method` are valid for the duration of the call, and
/// `address`/`new_address_ptr` point at a live function pointer the runtime
/// will dereference after this callback returns.
pub unsafe extern "C" fn on_native_method_bind(
    jvmti_env: *mut sys::jvmtiEnv,
    jni_env: *mut sys::JNIEnv,
    _thread: sys::jthread,
    method: sys::jmethodID,
    address: *mut std::os::raw::c_void,
    new_address_ptr: *mut *mut std::os::raw::c_void,
) {
    let Some((class_sig, method_name, method_sig)) =
        resolve_method_identity(jvmti_env, jni_env, method)
    else {
        return;
    };

    let Some(target) = InterceptTarget::from_binding(&class_sig, &method_name, &method_sig) else {
        return;
    };

    let state = agent_state();
    state.table.record_bind(target, address as usize);

    let wrapper = wrapper_address_for(target);
    if !new_address_ptr.is_null() {
        *new_address_ptr = wrapper;
    }
}

/// Resolves the three identity strings JVMTI exposes via
/// `GetMethodDeclaringClass` + `GetClassSignature` + `GetMethodName`. Pure
/// plumbing; any failure is treated as "not one of ours" rather than
/// propagated, since a `NativeMethodBind` event fires for every native
/// method the JVM binds, the overwhelming majority of which this agent has
/// no opinion about.
///
/// # Safety
/// `jvmti_env`/`jni_env`/`method` must be valid, as guaranteed by the
/// caller (a live `NativeMethodBind` callback).
unsafe fn resolve_method_identity(
    jvmti_env: *mut sys::jvmtiEnv,
    _jni_env: *mut sys::JNIEnv,
    method: sys::jmethodID,
) -> Option<(String, String, String)> {
    let get_declaring_class = (*(*jvmti_env)).GetMethodDeclaringClass?;
    let mut declaring_class = std::ptr::null_mut();
    if get_declaring_class(jvmti_env, method, &mut declaring_class) != sys::JVMTI_ERROR_NONE as sys::jvmtiError {
        return None;
    }

    let get_class_signature = (*(*jvmti_env)).GetClassSignature?;
    let mut class_sig: *mut c_char = std::ptr::null_mut();
    if get_class_signature(jvmti_env, declaring_class, &mut class_sig, std::ptr::null_mut())
        != sys::JVMTI_ERROR_NONE as sys::jvmtiError
    {
        return None;
    }

    let get_method_name = (*(*jvmti_env)).GetMethodName?;
    let mut method_name: *mut c_char = std::ptr::null_mut();
    let mut method_sig: *mut c_char = std::ptr::null_mut();
    if get_method_name(jvmti_env, method, &mut method_name, &mut method_sig, std::ptr::null_mut())
        != sys::JVMTI_ERROR_NONE as sys::jvmtiError
    {
        return None;
    }

    let class_sig = cstr_to_owned(class_sig)?;
    let method_name = cstr_to_owned(method_name)?;
    let method_sig = cstr_to_owned(method_sig)?;
    Some((class_sig, method_name, method_sig))
}

unsafe fn cstr_to_owned(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
}

/// The wrapper function JVMTI should bind for a given [`InterceptTarget`],
/// as a raw address. `spec.md` §9's "Polymorphism over native targets":
/// one concrete wrapper per signature, no single generic wrapper.
fn wrapper_address_for(target: InterceptTarget) -> *mut std::os::raw::c_void {
    use crate::ffi::wrappers;
    (match target {
        InterceptTarget::NioNetConnect0 => wrappers::nio_net_connect0 as usize,
        InterceptTarget::SocketChannelImplConnect0 => wrappers::socket_channel_impl_connect0 as usize,
        InterceptTarget::LegacySocketConnect0 => wrappers::legacy_socket_connect0 as usize,
        InterceptTarget::Inet6LookupAllHostAddr => wrappers::inet6_lookup_all_host_addr as usize,
        InterceptTarget::Inet4LookupAllHostAddr => wrappers::inet4_lookup_all_host_addr as usize,
    }) as *mut std::os::raw::c_void
}

/// `spec.md` §4.3 "VMInit callback". Probes the platform encoding, then
/// flips the process-wide VM-ready flag and activates every already-bound
/// wrapper.
///
/// The probing loop's bounded retry (~500ms) is platform-encoding
/// initialization order, which has no pure-Rust equivalent to test; this
/// function performs the probe inline and is exercised only by the
/// doctor's manual smoke path, not by `cargo test`.
///
/// # Safety
/// Called by the JVM at `VMInit` with valid `jvmti_env`/`jni_env` pointers.
pub unsafe extern "C" fn on_vm_init(_jvmti_env: *mut sys::jvmtiEnv, jni_env: *mut sys::JNIEnv, _thread: sys::jthread) {
    probe_platform_encoding_ready(jni_env);
    agent_state().mark_vm_ready();
}

/// Converts a short cached string to its native form in a bounded retry
/// loop, per `spec.md` §4.3 step 2. Platform string encoding in the JVM is
/// not guaranteed ready at the very first moment `VMInit` fires; this loop
/// gives it up to ~500ms, in 5ms increments, before giving up and
/// proceeding regardless (wrappers tolerate a still-uninitialised encoding
/// via the per-call `extract_inet_address_strings` degrade path).
///
/// # Safety
/// `jni_env` must be valid for the calling thread.
unsafe fn probe_platform_encoding_ready(jni_env: *mut sys::JNIEnv) {
    const BUDGET: std::time::Duration = std::time::Duration::from_millis(500);
    const STEP: std::time::Duration = std::time::Duration::from_millis(5);
    let start = std::time::Instant::now();
    loop {
        if probe_native_string(jni_env) {
            return;
        }
        if start.elapsed() >= BUDGET {
            return;
        }
        std::thread::sleep(STEP);
    }
}

/// Converts a short cached literal to its platform-native form via
/// `GetStringUTFChars`, returning `true` once that succeeds without
/// raising. `spec.md` §4.3 step 2 describes exactly this probe: "converting
/// a cached string to its native form."
///
/// # Safety
/// `jni_env` must be valid for the calling thread.
unsafe fn probe_native_string(jni_env: *mut sys::JNIEnv) -> bool {
    let Some(new_string_utf) = (*(*jni_env)).NewStringUTF else {
        return false;
    };
    let Some(get_string_utf_chars) = (*(*jni_env)).GetStringUTFChars else {
        return false;
    };
    let Some(release_string_utf_chars) = (*(*jni_env)).ReleaseStringUTFChars else {
        return false;
    };

    let literal = c"airgap";
    let jstr = new_string_utf(jni_env, literal.as_ptr());
    if jstr.is_null() {
        return false;
    }
    let mut is_copy: sys::jboolean = 0;
    let chars = get_string_utf_chars(jni_env, jstr, &mut is_copy);
    let ok = !chars.is_null();
    if ok {
        release_string_utf_chars(jni_env, jstr, chars);
    }
    ok
}

/// `spec.md` §4.3's supplemental `ThreadStart` registration
/// (`SPEC_FULL.md` §5): the native analogue of the managed
/// `InheritableThreadLocal` copy this crate's `spawn_inherited` primitive
/// models. A newly started native thread backing a `java.lang.Thread` has
/// no configuration slot of its own yet; this callback is the hook point
/// where a full native reimplementation would install one inherited from
/// the spawning thread, were that linkage observable from JVMTI alone (it
/// is not, in general — the JVM does not expose "which thread called
/// `Thread.start()`" here). Left as a documented no-op for that reason;
/// `ConfigurationStore::spawn_inherited` is the mechanism this crate
/// actually relies on for thread inheritance.
///
/// # Safety
/// Called by the JVM at `ThreadStart` with a valid `jvmti_env`.
pub unsafe extern "C" fn on_thread_start(
    _jvmti_env: *mut sys::jvmtiEnv,
    _jni_env: *mut sys::JNIEnv,
    _thread: sys::jthread,
) {
}

/// `spec.md` §4.4 managed-API fallback, translated as a
/// `ClassFileLoadHook`. Splices a real `checkConnection(host, -1,
/// "Managed-API")` call into `getAllByName`'s bytecode the first time
/// `java.net.InetAddress` loads — see [`classfile::instrument`] for the
/// splice itself. `Metrics::fallback_degraded` only increments when the
/// splice genuinely fails (malformed class data, method/attribute not
/// found); a successful splice is the common case and isn't a degrade.
///
/// # Safety
/// Called by the JVM at class load/redefinition with valid buffer pointers
/// sized `class_data_len`; `new_class_data_ptr`/`new_class_data_len_ptr`
/// must be writable, per the `jvmtiEventClassFileLoadHook` contract.
pub unsafe extern "C" fn on_class_file_load_hook(
    _jvmti_env: *mut sys::jvmtiEnv,
    _jni_env: *mut sys::JNIEnv,
    _class_being_redefined: sys::jclass,
    _loader: sys::jobject,
    name: *const c_char,
    _protection_domain: sys::jobject,
    class_data_len: sys::jint,
    class_data: *const std::os::raw::c_uchar,
    new_class_data_len_ptr: *mut sys::jint,
    new_class_data_ptr: *mut *mut std::os::raw::c_uchar,
) {
    let Some(binary_name) = cstr_to_owned(name) else {
        return;
    };
    if !classfile::is_target_class(&binary_name) {
        return;
    }

    let slice = std::slice::from_raw_parts(class_data, class_data_len as usize);
    let Ok(already_seen) = classfile::already_instrumented(slice) else {
        return;
    };
    if already_seen {
        return;
    }

    let patched = match classfile::instrument(slice) {
        Ok(patched) => patched,
        Err(error) => {
            tracing::warn!(%error, "managed-API fallback splice failed; falling back to native hook C only");
            agent_state()
                .metrics
                .fallback_degraded
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            return;
        }
    };
    let boxed = patched.into_boxed_slice();
    let len = boxed.len();
    let ptr = Box::into_raw(boxed) as *mut std::os::raw::c_uchar;
    // Leaked intentionally: JVMTI takes ownership of `new_class_data` via
    // `Deallocate`-free semantics documented for `ClassFileLoadHook` — the
    // JVM, not this agent, frees it after loading.
    *new_class_data_len_ptr = len as sys::jint;
    *new_class_data_ptr = ptr;
}
