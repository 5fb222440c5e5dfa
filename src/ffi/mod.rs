//! The native agent (component C) and the class-file-hook managed-API
//! fallback (component D) — `spec.md` §4.3, §4.4.
//!
//! The only module in this crate that touches raw FFI; per the crate's
//! own convention (crate-root `#![deny(unsafe_code)]` with a local
//! `#[allow(unsafe_code)]` for the modules that must cross it), this is
//! that exception.
//!
//! - [`state`]: process-wide agent state — no `unsafe` needed at all, since
//!   function-pointer addresses are stored as opaque `usize`s.
//! - [`sys`]: raw JVMTI bindings generated by `build.rs`, gated behind the
//!   `jvmti-sys` feature.
//! - [`hooks`]: the `NativeMethodBind`/`VMInit`/`ThreadStart`/
//!   `ClassFileLoadHook` event callbacks.
//! - [`wrappers`]: the connect/DNS decision dance — pure and unit-testable
//!   in its top half, `unsafe extern "system"` native-method
//!   implementations in its bottom half (gated behind `jvmti-sys`).
//! - [`classfile`]: pure, offline-testable class-file constant-pool
//!   scanning and bytecode splicing for the managed-API fallback.
//! - [`entry`]: `Agent_OnLoad`, `Agent_OnUnload`, and the JNI-style
//!   registration entry point — gated behind `jvmti-sys`, since none of it
//!   can run without the real JVMTI bindings.

#![allow(unsafe_code)]

pub mod classfile;
#[cfg(feature = "jvmti-sys")]
pub mod entry;
#[cfg(feature = "jvmti-sys")]
pub mod hooks;
pub mod state;
#[cfg(feature = "jvmti-sys")]
pub mod sys;
pub mod wrappers;

use std::sync::OnceLock;

use crate::store::ConfigurationStore;

/// The single process-wide [`ConfigurationStore`] the native wrappers
/// consult. Distinct from any store a host application builds for its own
/// in-process testing (e.g. the doctor CLI) — this one backs the
/// `cdylib` entry points only.
static AGENT_STORE: OnceLock<ConfigurationStore> = OnceLock::new();

/// Returns the agent's process-wide store, initialising it on first use
/// with the default [`crate::store::StoreOptions`]. The real managed-side
/// `setConfiguration`/`clearConfiguration` calls reach this store through
/// [`crate::bridge`]; [`wrappers`] reads decisions from it directly.
#[must_use]
pub fn agent_store() -> &'static ConfigurationStore {
    AGENT_STORE.get_or_init(ConfigurationStore::default)
}

#[cfg(feature = "jvmti-sys")]
mod jni_interop {
    //! JNI-level plumbing shared by [`super::wrappers`]'s native half:
    //! string extraction and raising the pending
    //! `NetworkRequestAttempted` exception. Uses the `jni` crate's raw
    //! `sys` types directly (rather than its safe `JNIEnv` wrapper) since
    //! these functions are called from native-method wrapper contexts that
    //! only ever see a raw `jni::sys::JNIEnv`.

    use jni::sys::{jboolean, jobject, jstring, JNIEnv};
    use std::os::raw::c_char;

    use crate::error::BlockInfo;

    /// The managed exception class this crate's failure mode raises.
    /// Package chosen to match the configuration store's own package
    /// (`spec.md` §6 derives the registration symbol name from it); kept
    /// as a single constant so a future rename only touches one line.
    const NETWORK_REQUEST_ATTEMPTED_CLASS: &CStrLit =
        &CStrLit(c"io/github/garryjeromson/airgap/NetworkRequestAttempted");

    /// A tiny wrapper so the `const` above can hold a `&CStr` without a
    /// `'static` lifetime ceremony at every call site.
    struct CStrLit(&'static std::ffi::CStr);

    /// Calls a zero-argument, `String`-returning instance method by name
    /// (`getHostAddress`/`getHostName` on `InetAddress`). Returns `None`
    /// if the method lookup, the call, or the UTF-8 decode fails — each
    /// independently treated as "no such string" per `spec.md` §7's
    /// platform-encoding recovery policy, and any pending exception from a
    /// failed step is cleared before returning.
    ///
    /// # Safety
    /// `env` and `obj` must be valid for the calling thread.
    pub unsafe fn call_string_method(env: JNIEnv, obj: jobject, method: &str) -> Option<String> {
        let get_object_class = (*(*env)).GetObjectClass?;
        let get_method_id = (*(*env)).GetMethodID?;
        let call_object_method = (*(*env)).CallObjectMethodA?;
        let exception_check = (*(*env)).ExceptionCheck?;
        let exception_clear = (*(*env)).ExceptionClear?;

        let class = get_object_class(env, obj);
        if class.is_null() {
            return None;
        }
        let name = std::ffi::CString::new(method).ok()?;
        let sig = c"()Ljava/lang/String;";
        let method_id = get_method_id(env, class, name.as_ptr() as *const c_char, sig.as_ptr());
        if method_id.is_null() {
            if exception_check(env) != 0 {
                exception_clear(env);
            }
            return None;
        }

        let result = call_object_method(env, obj, method_id, std::ptr::null());
        if exception_check(env) != 0 {
            exception_clear(env);
            return None;
        }
        if result.is_null() {
            return None;
        }
        jstring_to_string(env, result as jstring)
    }

    /// Decodes a `jstring` to an owned `String` via `GetStringUTFChars`.
    ///
    /// # Safety
    /// `env` and `s` must be valid for the calling thread.
    pub unsafe fn jstring_to_string(env: JNIEnv, s: jstring) -> Option<String> {
        if s.is_null() {
            return None;
        }
        let get_string_utf_chars = (*(*env)).GetStringUTFChars?;
        let release_string_utf_chars = (*(*env)).ReleaseStringUTFChars?;

        let mut is_copy: jboolean = 0;
        let chars = get_string_utf_chars(env, s, &mut is_copy);
        if chars.is_null() {
            return None;
        }
        let owned = std::ffi::CStr::from_ptr(chars).to_string_lossy().into_owned();
        release_string_utf_chars(env, s, chars);
        Some(owned)
    }

    /// Synthesises a pending `NetworkRequestAttempted` on `env`, per
    /// `spec.md` §9: the decision engine's `Result<(), BlockInfo>` is
    /// translated back into the managed runtime's calling convention only
    /// at this boundary.
    ///
    /// # Safety
    /// `env` must be valid for the calling thread.
    pub unsafe fn raise_block_exception(env: JNIEnv, info: &BlockInfo) {
        let find_class = match (*(*env)).FindClass {
            Some(f) => f,
            None => return,
        };
        let throw_new = match (*(*env)).ThrowNew {
            Some(f) => f,
            None => return,
        };
        let class = find_class(env, NETWORK_REQUEST_ATTEMPTED_CLASS.0.as_ptr());
        if class.is_null() {
            return;
        }
        let message = std::ffi::CString::new(info.to_string()).unwrap_or_default();
        throw_new(env, class, message.as_ptr());
    }
}

#[cfg(feature = "jvmti-sys")]
pub use jni_interop::{call_string_method, jstring_to_string, raise_block_exception as bridge_raise};

#[cfg(feature = "jvmti-sys")]
pub use self::agent_store as bridge_store;
