//! Raw JVMTI/JNI bindings, generated by `build.rs` against the active
//! JDK's headers.
//!
//! Gated behind the `jvmti-sys` feature: nothing else in this crate
//! depends on the generated types, so `cargo test` on the default feature
//! set never needs a JDK. [`super::hooks`], [`super::wrappers`]'s unsafe
//! dispatch half, and [`super::entry`] are the only consumers.

#![allow(
    non_camel_case_types,
    non_snake_case,
    non_upper_case_globals,
    dead_code,
    clippy::all
)]

include!(concat!(env!("OUT_DIR"), "/jvmti_bindings.rs"));
