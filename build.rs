//! Generates raw JVMTI/JNI bindings from the active JDK's headers.
//!
//! Only runs when the `jvmti-sys` feature is enabled — `cargo test` on the
//! default feature set never needs a JDK installed, since the decision
//! engine, matcher, and lifecycle glue (components A/B/E) are plain Rust.
//! Building the real native-agent `cdylib` does need this: `JAVA_HOME`
//! must point at a JDK whose `include/jvmti.h` and platform `jni_md.h` are
//! on disk.

use std::env;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-env-changed=JAVA_HOME");
    println!("cargo:rerun-if-changed=build.rs");

    if env::var("CARGO_FEATURE_JVMTI_SYS").is_err() {
        return;
    }

    let java_home = env::var("JAVA_HOME")
        .expect("JAVA_HOME must be set to build with the `jvmti-sys` feature");
    let java_home = PathBuf::from(java_home);
    let include_dir = java_home.join("include");
    let platform_dir = include_dir.join(platform_include_subdir());

    let bindings = bindgen::Builder::default()
        .header_contents(
            "jvmti_wrapper.h",
            "#include <jvmti.h>\n#include <jni.h>\n",
        )
        .clang_arg(format!("-I{}", include_dir.display()))
        .clang_arg(format!("-I{}", platform_dir.display()))
        .allowlist_type("jvmtiEnv")
        .allowlist_type("jvmtiInterface_1")
        .allowlist_type("jvmtiEvent.*")
        .allowlist_type("jvmtiCapabilities")
        .allowlist_function("JNI_GetCreatedJavaVMs")
        .allowlist_var("JVMTI_.*")
        .allowlist_var("JNI_.*")
        .derive_default(true)
        .derive_debug(true)
        .parse_callbacks(Box::new(bindgen::CargoCallbacks::new()))
        .generate()
        .expect("failed to generate JVMTI bindings; check JAVA_HOME");

    let out_path = PathBuf::from(env::var("OUT_DIR").unwrap()).join("jvmti_bindings.rs");
    bindings
        .write_to_file(&out_path)
        .expect("failed to write JVMTI bindings");
}

fn platform_include_subdir() -> &'static str {
    if cfg!(target_os = "macos") {
        "darwin"
    } else if cfg!(target_os = "windows") {
        "win32"
    } else {
        "linux"
    }
}
