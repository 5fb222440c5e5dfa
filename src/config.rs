//! The data model shared by the decision engine and its callers.
//!
//! Mirrors `spec.md` §3: `NetworkConfiguration` is immutable once built,
//! `block_patterns` take precedence over `allow_patterns`, and `generation`
//! is stamped by the store at `set_configuration` time, never by the
//! caller.

use std::collections::BTreeSet;
use std::fmt;

use crate::matcher::Pattern;

/// Hosts permitted by default regardless of configuration, per `spec.md`
/// §4.1 step 4. A configuration may still block one of these explicitly via
/// `block_patterns` — the default is permissive, not absolute.
pub const LOOPBACK_ALIASES: [&str; 3] = ["localhost", "127.0.0.1", "::1"];

/// Which interception layer raised a block. Appears verbatim in
/// `BlockInfo`'s message (`spec.md` §4.1 "Caller-tag vocabulary").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallerTag {
    /// The native `connect0` wrapper.
    NativeAgent,
    /// The native `lookupAllHostAddr` wrapper.
    NativeDns,
    /// The class-file-hook managed-API fallback.
    ManagedApi,
    /// A caller tag could not be determined.
    Unknown,
}

impl CallerTag {
    /// The exact string `spec.md` specifies for this tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NativeAgent => "Native-Agent",
            Self::NativeDns => "Native-DNS",
            Self::ManagedApi => "Managed-API",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for CallerTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolves the `spec.md` §9 Open Question: whether the always-loopback
/// aliases are permitted unconditionally (subject to an explicit block) or
/// must themselves appear in `allow_patterns`.
///
/// `spec.md` §4.1 step 4 specifies [`PermissiveByDefault`](Self::PermissiveByDefault);
/// it is the default here. [`RequireExplicitAllow`](Self::RequireExplicitAllow)
/// is the alternative the source material's integration-test annotations
/// suggested, kept as an explicit, documented switch rather than a second
/// silently-diverging code path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopbackPolicy {
    /// Loopback aliases are allowed unless explicitly blocked.
    #[default]
    PermissiveByDefault,
    /// Loopback aliases must appear in `allow_patterns` like any other
    /// host.
    RequireExplicitAllow,
}

/// An immutable allow/block configuration, stamped with the store
/// generation at the time it was set.
#[derive(Debug, Clone)]
pub struct NetworkConfiguration {
    allow_patterns: BTreeSet<Pattern>,
    block_patterns: BTreeSet<Pattern>,
    generation: u64,
}

impl NetworkConfiguration {
    /// Starts building a configuration. `generation` defaults to `0` and is
    /// overwritten by [`crate::store::ConfigurationStore::set_configuration`].
    #[must_use]
    pub fn builder() -> NetworkConfigurationBuilder {
        NetworkConfigurationBuilder::default()
    }

    /// An empty configuration: no explicit allows, no explicit blocks. Per
    /// P4/scenario 1, this still permits loopback (under the default
    /// policy) and blocks everything else.
    #[must_use]
    pub fn empty() -> Self {
        Self::builder().build()
    }

    /// Patterns this configuration explicitly allows.
    #[must_use]
    pub fn allow_patterns(&self) -> impl Iterator<Item = &Pattern> {
        self.allow_patterns.iter()
    }

    /// Patterns this configuration explicitly blocks.
    #[must_use]
    pub fn block_patterns(&self) -> impl Iterator<Item = &Pattern> {
        self.block_patterns.iter()
    }

    /// The generation this configuration was stamped with.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    /// Returns `true` if any block pattern matches `host`.
    #[must_use]
    pub fn is_explicitly_blocked(&self, host: &str) -> bool {
        crate::matcher::match_any(host, self.block_patterns.iter())
    }

    /// Returns `true` if any allow pattern matches `host`.
    #[must_use]
    pub fn is_explicitly_allowed(&self, host: &str) -> bool {
        crate::matcher::match_any(host, self.allow_patterns.iter())
    }
}

/// Builder for [`NetworkConfiguration`]. Keeps `generation` out of the
/// public constructor surface — it is the store's to stamp, not a test
/// adapter's.
#[derive(Debug, Default)]
pub struct NetworkConfigurationBuilder {
    allow_patterns: BTreeSet<Pattern>,
    block_patterns: BTreeSet<Pattern>,
}

impl NetworkConfigurationBuilder {
    /// Adds one allow pattern. Panics on a malformed glob; use
    /// [`Self::try_allow`] to handle that explicitly.
    #[must_use]
    pub fn allow(mut self, pattern: impl AsRef<str>) -> Self {
        self.allow_patterns.insert(
            Pattern::new(pattern.as_ref()).unwrap_or_else(|e| panic!("invalid pattern: {e}")),
        );
        self
    }

    /// Adds one block pattern. Panics on a malformed glob; use
    /// [`Self::try_block`] to handle that explicitly.
    #[must_use]
    pub fn block(mut self, pattern: impl AsRef<str>) -> Self {
        self.block_patterns.insert(
            Pattern::new(pattern.as_ref()).unwrap_or_else(|e| panic!("invalid pattern: {e}")),
        );
        self
    }

    /// Adds several allow patterns at once.
    #[must_use]
    pub fn allow_all(mut self, patterns: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        for p in patterns {
            self = self.allow(p);
        }
        self
    }

    /// Adds several block patterns at once.
    #[must_use]
    pub fn block_all(mut self, patterns: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        for p in patterns {
            self = self.block(p);
        }
        self
    }

    /// Fallible variant of [`Self::allow`].
    pub fn try_allow(mut self, pattern: impl AsRef<str>) -> Result<Self, crate::matcher::PatternError> {
        self.allow_patterns.insert(Pattern::new(pattern.as_ref())?);
        Ok(self)
    }

    /// Fallible variant of [`Self::block`].
    pub fn try_block(mut self, pattern: impl AsRef<str>) -> Result<Self, crate::matcher::PatternError> {
        self.block_patterns.insert(Pattern::new(pattern.as_ref())?);
        Ok(self)
    }

    /// Finishes the configuration. `generation` is `0` until stamped by the
    /// store.
    #[must_use]
    pub fn build(self) -> NetworkConfiguration {
        NetworkConfiguration {
            allow_patterns: self.allow_patterns,
            block_patterns: self.block_patterns,
            generation: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_configuration_has_no_patterns() {
        let cfg = NetworkConfiguration::empty();
        assert_eq!(cfg.allow_patterns().count(), 0);
        assert_eq!(cfg.block_patterns().count(), 0);
    }

    #[test]
    fn builder_collects_allow_and_block_patterns() {
        let cfg = NetworkConfiguration::builder()
            .allow("example.com")
            .block("evil.com")
            .build();
        assert!(cfg.is_explicitly_allowed("example.com"));
        assert!(cfg.is_explicitly_blocked("evil.com"));
        assert!(!cfg.is_explicitly_blocked("example.com"));
    }

    #[test]
    fn caller_tag_strings_match_spec_vocabulary() {
        assert_eq!(CallerTag::NativeAgent.as_str(), "Native-Agent");
        assert_eq!(CallerTag::NativeDns.as_str(), "Native-DNS");
        assert_eq!(CallerTag::ManagedApi.as_str(), "Managed-API");
        assert_eq!(CallerTag::Unknown.as_str(), "unknown");
    }

    #[test]
    fn generation_defaults_to_zero_until_stamped() {
        let cfg = NetworkConfiguration::empty();
        assert_eq!(cfg.generation(), 0);
        let stamped = cfg.with_generation(7);
        assert_eq!(stamped.generation(), 7);
    }
}
