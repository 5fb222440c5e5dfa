//! Tracing setup driven by the agent's `=debug` load option.
//!
//! `spec.md` §6 recognises exactly one agent-load option, the literal
//! token `debug`. `spec.md` §4.3 additionally calls for DNS-interception
//! degradation to be "logged (at debug level)". Both route through
//! `tracing`; this module just picks the filter.

/// Parses the options string following `=` in `-agentpath:<path>[=debug]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AgentOptions {
    /// Whether verbose diagnostic output was requested.
    pub debug: bool,
}

impl AgentOptions {
    /// Parses the raw options string the host runtime hands `Agent_OnLoad`.
    /// An empty string is the no-options case; anything other than the
    /// literal token `debug` is ignored rather than rejected, since the
    /// host runtime has no channel to report a parse error back through.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        Self {
            debug: raw.trim() == "debug",
        }
    }
}

/// Installs a global `tracing` subscriber at `DEBUG` (if `options.debug`)
/// or `WARN` otherwise. Safe to call more than once; later calls are
/// no-ops, since a JVMTI agent may be asked to initialize telemetry before
/// `VMInit` in some startup orders.
#[cfg(feature = "tracing-integration")]
pub fn init(options: AgentOptions) {
    use tracing_subscriber::EnvFilter;

    let default_level = if options.debug { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("AIRGAP_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// No-op when the crate is built without `tracing-integration`; the
/// `tracing` macros themselves still compile to no-ops without a
/// subscriber installed.
#[cfg(not(feature = "tracing-integration"))]
pub fn init(_options: AgentOptions) {}
