//! Per-test network isolation for a hosted JVM test runtime.
//!
//! This crate is the interception core behind an annotation-driven testing
//! library: a test marked "blocked" must fail with a typed exception the
//! moment it reaches a host outside its allow-list, and must succeed against
//! anything the allow-list covers. The core does not know about annotations,
//! build-system wiring, or test-framework adapters — those are collaborators
//! that call into the surface this crate exposes.
//!
//! # Module structure
//!
//! - [`config`]: `NetworkConfiguration`, caller tags, the loopback-policy
//!   switch.
//! - [`matcher`]: pure host-glob matching (component B).
//! - [`store`]: the thread-scoped decision engine (component A) — generation
//!   counters, the per-thread configuration slot, the decision rule, and the
//!   infrastructure exemption.
//! - [`lifecycle`]: `before_test`/`after_test` glue for test-framework
//!   adapters (component E).
//! - [`error`]: `BlockInfo` (the typed failure payload) and `AgentError`
//!   (translation-boundary failures).
//! - [`telemetry`]: tracing subscriber setup driven by the agent's `=debug`
//!   load option.
//! - [`ffi`]: the JVMTI native agent (component C) and the class-file-hook
//!   managed-API fallback (component D). The only module in this crate
//!   that touches raw FFI.
//! - [`bridge`]: JNI-exported facade consumed by out-of-scope test-framework
//!   adapters (`setConfiguration`/`clearConfiguration`/...).
//!
//! # Non-goals
//!
//! No payload inspection, no protocol implementation, no defense against a
//! test that reaches the network by `dlopen`-ing libc directly, and no
//! enforcement for native threads that predate this agent's load.

#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod bridge;
pub mod config;
pub mod error;
pub mod ffi;
pub mod lifecycle;
pub mod matcher;
pub mod store;
pub mod telemetry;

pub use config::{CallerTag, LoopbackPolicy, NetworkConfiguration, NetworkConfigurationBuilder};
pub use error::{AgentError, BlockInfo};
pub use store::{ConfigurationStore, StoreOptions};
