//! The three exported symbols `spec.md` §6 names: `Agent_OnLoad`,
//! `Agent_OnUnload`, and the JNI-style registration function the
//! configuration store's managed class calls once the runtime is ready.
//!
//! This is the only module that runs before any Rust-side initialisation
//! has happened at all — everything here must tolerate being the very
//! first code the dynamic linker's symbol resolution touches.

use std::ffi::CStr;
use std::os::raw::{c_char, c_void};

use crate::ffi::hooks;
use crate::ffi::state::{agent_state, CachedHandles};
use crate::ffi::sys;
use crate::telemetry::{self, AgentOptions};

/// The fully-qualified, slash-separated class name of the configuration
/// store's managed-side entry point. `spec.md` §6: the registration
/// symbol's name is derived from this with `_registerWithAgent` appended,
/// per the JNI native-linking convention (dots become underscores).
pub const CONFIGURATION_STORE_CLASS: &str = "io/github/garryjeromson/airgap/ConfigurationStore";

/// `spec.md` §4.3 "Agent load" steps 1-4.
///
/// # Safety
/// Called by the JVM exactly as `JNI_OnLoad`/agent-loading documents:
/// `vm` is a valid `JavaVM*` for the process, `options` is either null or a
/// NUL-terminated C string owned by the caller for the duration of this
/// call.
#[no_mangle]
pub unsafe extern "system" fn Agent_OnLoad(
    vm: *mut sys::JavaVM,
    options: *mut c_char,
    _reserved: *mut c_void,
) -> sys::jint {
    let options_str = if options.is_null() {
        String::new()
    } else {
        CStr::from_ptr(options).to_string_lossy().into_owned()
    };
    telemetry::init(AgentOptions::parse(&options_str));

    let Some(jvmti_env) = acquire_jvmti_env(vm) else {
        tracing::error!("failed to acquire jvmtiEnv at Agent_OnLoad");
        return sys::JNI_ERR as sys::jint;
    };
    agent_state().set_jvmti_env(jvmti_env as usize);

    if !request_capabilities(jvmti_env) {
        tracing::error!("AddCapabilities failed; aborting agent load");
        return sys::JNI_ERR as sys::jint;
    }

    if !set_event_callbacks(jvmti_env) || !enable_events(jvmti_env) {
        tracing::error!("event callback registration failed; aborting agent load");
        return sys::JNI_ERR as sys::jint;
    }

    tracing::debug!("airgap-agent loaded");
    0 // JNI_OK
}

/// `spec.md` §9 "Cyclic managed<->native references": on unload the
/// agent's own global references into the managed world are released; the
/// managed side never holds native pointers to release in turn.
///
/// # Safety
/// Called by the JVM at shutdown with a valid `JavaVM*`.
#[no_mangle]
pub unsafe extern "system" fn Agent_OnUnload(vm: *mut sys::JavaVM) {
    let Some(jni_env) = acquire_jni_env(vm) else {
        return;
    };
    let handles = agent_state().handles();
    let delete_global_ref = (*(*jni_env)).DeleteGlobalRef;
    if handles.class_ref != 0 {
        delete_global_ref(jni_env, handles.class_ref as sys::jobject);
    }
}

/// The registration entry point named by [`CONFIGURATION_STORE_CLASS`]
/// with `_registerWithAgent` appended. Caches the store class and its
/// three decision-entry method handles as global references — `spec.md`
/// §3: "populated exactly once, during runtime initialization, and
/// treated as immutable thereafter."
///
/// # Safety
/// Called by the JVM as an ordinary native method: `env` and `this_class`
/// are valid for the calling thread.
#[no_mangle]
pub unsafe extern "system" fn Java_io_github_garryjeromson_airgap_ConfigurationStore_registerWithAgent(
    env: *mut sys::JNIEnv,
    this_class: sys::jclass,
) {
    let jni = &**env;
    let Some(new_global_ref) = jni.NewGlobalRef else {
        return;
    };
    let Some(get_static_method_id) = jni.GetStaticMethodID else {
        return;
    };

    let class_ref = new_global_ref(env, this_class as sys::jobject);
    let check_connection = lookup_static_method(
        env,
        get_static_method_id,
        this_class,
        c"checkConnection",
        c"(Ljava/lang/String;ILjava/lang/String;)V",
    );
    let is_explicitly_blocked = lookup_static_method(
        env,
        get_static_method_id,
        this_class,
        c"isExplicitlyBlocked",
        c"(Ljava/lang/String;)Z",
    );
    let has_active_configuration = lookup_static_method(
        env,
        get_static_method_id,
        this_class,
        c"hasActiveConfiguration",
        c"()Z",
    );

    agent_state().register(CachedHandles {
        class_ref: class_ref as usize,
        check_connection: check_connection as usize,
        is_explicitly_blocked: is_explicitly_blocked as usize,
        has_active_configuration: has_active_configuration as usize,
    });
    tracing::debug!("configuration store registered with agent");
}

unsafe fn lookup_static_method(
    env: *mut sys::JNIEnv,
    get_static_method_id: unsafe extern "system" fn(
        *mut sys::JNIEnv,
        sys::jclass,
        *const c_char,
        *const c_char,
    ) -> sys::jmethodID,
    class: sys::jclass,
    name: &CStr,
    sig: &CStr,
) -> sys::jmethodID {
    get_static_method_id(env, class, name.as_ptr(), sig.as_ptr())
}

/// # Safety
/// `vm` must be a valid `JavaVM*`.
unsafe fn acquire_jvmti_env(vm: *mut sys::JavaVM) -> Option<*mut sys::jvmtiEnv> {
    let mut penv: *mut c_void = std::ptr::null_mut();
    let get_env = (*(*vm)).GetEnv?;
    let rc = get_env(vm, &mut penv, sys::JVMTI_VERSION_1_2 as sys::jint);
    if rc != 0 || penv.is_null() {
        return None;
    }
    Some(penv.cast())
}

/// # Safety
/// `vm` must be a valid `JavaVM*`.
unsafe fn acquire_jni_env(vm: *mut sys::JavaVM) -> Option<*mut sys::JNIEnv> {
    let mut penv: *mut c_void = std::ptr::null_mut();
    let get_env = (*(*vm)).GetEnv?;
    let rc = get_env(vm, &mut penv, sys::JNI_VERSION_1_6 as sys::jint);
    if rc != 0 || penv.is_null() {
        return None;
    }
    Some(penv.cast())
}

/// `spec.md` §4.3 step 2: request `native_method_bind_events`, plus the
/// class-hook capability `SPEC_FULL.md` §1/§6 need for component D.
///
/// # Safety
/// `jvmti_env` must be valid, as produced by [`acquire_jvmti_env`].
unsafe fn request_capabilities(jvmti_env: *mut sys::jvmtiEnv) -> bool {
    let Some(add_capabilities) = (*(*jvmti_env)).AddCapabilities else {
        return false;
    };
    let mut caps: sys::jvmtiCapabilities = std::mem::zeroed();
    caps.set_can_generate_native_method_bind_events(1);
    caps.set_can_generate_all_class_hook_events(1);
    add_capabilities(jvmti_env, &caps) == sys::JVMTI_ERROR_NONE as sys::jvmtiError
}

/// # Safety
/// `jvmti_env` must be valid.
unsafe fn set_event_callbacks(jvmti_env: *mut sys::jvmtiEnv) -> bool {
    let Some(set_event_callbacks) = (*(*jvmti_env)).SetEventCallbacks else {
        return false;
    };
    let mut callbacks: sys::jvmtiEventCallbacks = std::mem::zeroed();
    callbacks.NativeMethodBind = Some(hooks::on_native_method_bind);
    callbacks.VMInit = Some(hooks::on_vm_init);
    callbacks.ThreadStart = Some(hooks::on_thread_start);
    callbacks.ClassFileLoadHook = Some(hooks::on_class_file_load_hook);
    let size = std::mem::size_of::<sys::jvmtiEventCallbacks>() as sys::jint;
    set_event_callbacks(jvmti_env, &callbacks, size) == sys::JVMTI_ERROR_NONE as sys::jvmtiError
}

/// # Safety
/// `jvmti_env` must be valid.
unsafe fn enable_events(jvmti_env: *mut sys::jvmtiEnv) -> bool {
    let Some(set_event_notification_mode) = (*(*jvmti_env)).SetEventNotificationMode else {
        return false;
    };
    [
        sys::jvmtiEvent_JVMTI_EVENT_NATIVE_METHOD_BIND,
        sys::jvmtiEvent_JVMTI_EVENT_VM_INIT,
        sys::jvmtiEvent_JVMTI_EVENT_THREAD_START,
        sys::jvmtiEvent_JVMTI_EVENT_CLASS_FILE_LOAD_HOOK,
    ]
    .into_iter()
    .all(|event| {
        set_event_notification_mode(
            jvmti_env,
            sys::jvmtiEventMode_JVMTI_ENABLE,
            event,
            std::ptr::null_mut(),
        ) == sys::JVMTI_ERROR_NONE as sys::jvmtiError
    })
}
