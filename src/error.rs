//! Error types for the interception core.
//!
//! `spec.md` §7 splits failures into the one user-visible outcome
//! (`BlockInfo`, surfaced to the JVM as `NetworkRequestAttempted`) and a
//! handful of translation-boundary failures that never reach test code. The
//! two are kept as separate types rather than variants of one enum: a
//! `BlockInfo` is the *successful* outcome of a decision (the decision
//! engine did its job and said no), while `AgentError` is the agent failing
//! to do its job at all.

use std::fmt;

use crate::config::CallerTag;

/// The payload of a blocked network attempt.
///
/// This is `spec.md`'s `NetworkRequestAttempted`, translated as a plain
/// result value per §9 ("the natural shape is a result value"). The FFI
/// wrapper is responsible for turning an `Err(BlockInfo)` into a pending
/// Java exception of that name; everywhere else in this crate it is just an
/// ordinary `std::error::Error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockInfo {
    host: String,
    port: i32,
    caller_tag: CallerTag,
}

impl BlockInfo {
    /// Builds a new blocked-attempt payload.
    #[must_use]
    pub fn new(host: impl Into<String>, port: i32, caller_tag: CallerTag) -> Self {
        Self {
            host: host.into(),
            port,
            caller_tag,
        }
    }

    /// The host that was blocked.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The port of the blocked attempt. `-1` for DNS-only lookups, per
    /// `spec.md` §4.3 ("Port is `-1` because DNS has no port").
    #[must_use]
    pub const fn port(&self) -> i32 {
        self.port
    }

    /// Which interception layer raised the block.
    #[must_use]
    pub const fn caller_tag(&self) -> CallerTag {
        self.caller_tag
    }
}

impl fmt::Display for BlockInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Network request blocked: {}:{} via {}",
            self.host,
            self.port,
            self.caller_tag.as_str()
        )
    }
}

impl std::error::Error for BlockInfo {}

/// Failures internal to the agent's own lifecycle, never surfaced to test
/// code. `spec.md` §7 lists these as agent-initialization failure (fatal),
/// platform-encoding-not-ready (transient, recovered locally), a missing
/// cached method handle (recovered: call the original, no error), and a
/// missing original function pointer at call time (surfaced as the
/// runtime's own error code, not this type). Only the ones that actually
/// need to travel between Rust functions as an `Err` are modeled here; the
/// fully-local recoveries are handled inline where they occur and never
/// construct a variant.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// The tool-interface environment could not be obtained, or requesting
    /// `native_method_bind_events` failed. Per `spec.md` §4.3, agent load
    /// aborts; the host runtime does not start.
    #[error("agent initialization failed: {0}")]
    Initialization(String),

    /// `register_with_agent` was invoked before `VMInit`, or the cached
    /// class/method handles were never populated. Callers that hit this
    /// must fall back to calling the original native implementation rather
    /// than propagating the error to test code.
    #[error("agent registration not completed")]
    NotRegistered,

    /// A native function pointer recorded for `target` was never observed
    /// at bind time. Conservative: the wrapper returns the host runtime's
    /// error code rather than silently calling nothing.
    #[error("no original implementation recorded for {target}")]
    MissingOriginal {
        /// The fully-qualified native-method identity that was looked up.
        target: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_info_message_format() {
        let info = BlockInfo::new("evil.example.com", 443, CallerTag::NativeAgent);
        assert_eq!(
            info.to_string(),
            "Network request blocked: evil.example.com:443 via Native-Agent"
        );
    }

    #[test]
    fn block_info_dns_port_is_negative_one() {
        let info = BlockInfo::new("example.com", -1, CallerTag::NativeDns);
        assert_eq!(info.port(), -1);
        assert!(info.to_string().contains(":-1 via Native-DNS"));
    }

    #[test]
    fn block_info_accessors_roundtrip() {
        let info = BlockInfo::new("host", 80, CallerTag::ManagedApi);
        assert_eq!(info.host(), "host");
        assert_eq!(info.port(), 80);
        assert_eq!(info.caller_tag(), CallerTag::ManagedApi);
    }

    #[test]
    fn agent_error_display() {
        let err = AgentError::MissingOriginal {
            target: "sun.nio.ch.Net.connect0".to_string(),
        };
        assert!(err.to_string().contains("sun.nio.ch.Net.connect0"));
    }
}
