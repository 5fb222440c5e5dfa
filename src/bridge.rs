//! The JNI-exported facade `spec.md` §6 calls the "Decision-engine public
//! surface consumed by adapters (E)".
//!
//! `SPEC_FULL.md` §1: the decision engine itself moved entirely into
//! native Rust ([`crate::store`]), but the out-of-scope testing-framework
//! adapters still need to call `setConfiguration`/`clearConfiguration`/
//! `hasActiveConfiguration` from managed code, so this thin facade
//! preserves that public surface. Unlike [`crate::ffi`], nothing here
//! needs `unsafe`: the `jni` crate's safe API is sufficient for everything
//! this module does.

use jni::objects::{JClass, JObjectArray, JString};
use jni::sys::jboolean;
use jni::JNIEnv;

use crate::config::NetworkConfigurationBuilder;
use crate::ffi::agent_store;
use crate::matcher::Pattern;

const JNI_TRUE: jboolean = 1;
const JNI_FALSE: jboolean = 0;

/// Reads a `String[]` argument into an owned `Vec<String>`. Any element
/// that fails to decode is skipped rather than aborting the whole call —
/// a single malformed pattern should not take down configuration for every
/// other pattern in the same call.
fn read_string_array(env: &mut JNIEnv, array: &JObjectArray) -> Vec<String> {
    let len = env.get_array_length(array).unwrap_or(0);
    let mut out = Vec::with_capacity(len.max(0) as usize);
    for i in 0..len {
        let Ok(element) = env.get_object_array_element(array, i) else {
            continue;
        };
        if element.is_null() {
            continue;
        }
        let jstr = JString::from(element);
        if let Ok(s) = env.get_string(&jstr) {
            out.push(s.into());
        }
    }
    out
}

/// `setConfiguration(allow_patterns, block_patterns)`. Invalid glob
/// patterns (empty or whitespace-containing, per [`crate::matcher`]) are
/// silently dropped from the built configuration rather than thrown back
/// to the caller — there is no surfaced-error contract for this entry
/// point in `spec.md` §6, and the adapter layer is the out-of-scope
/// collaborator responsible for validating annotation values before they
/// reach here.
#[no_mangle]
pub extern "system" fn Java_io_github_garryjeromson_airgap_ConfigurationStore_setConfiguration<'local>(
    mut env: JNIEnv<'local>,
    _class: JClass<'local>,
    allow_patterns: JObjectArray<'local>,
    block_patterns: JObjectArray<'local>,
) {
    let allow = read_string_array(&mut env, &allow_patterns);
    let block = read_string_array(&mut env, &block_patterns);

    let builder = NetworkConfigurationBuilder::default()
        .allow_all(allow.into_iter().filter(|p| Pattern::new(p.as_str()).is_ok()))
        .block_all(block.into_iter().filter(|p| Pattern::new(p.as_str()).is_ok()));

    agent_store().set_configuration(builder.build());
}

/// `clearConfiguration()`.
#[no_mangle]
pub extern "system" fn Java_io_github_garryjeromson_airgap_ConfigurationStore_clearConfiguration<'local>(
    _env: JNIEnv<'local>,
    _class: JClass<'local>,
) {
    agent_store().clear_configuration();
}

/// `hasActiveConfiguration() -> bool`.
#[no_mangle]
pub extern "system" fn Java_io_github_garryjeromson_airgap_ConfigurationStore_hasActiveConfiguration<'local>(
    _env: JNIEnv<'local>,
    _class: JClass<'local>,
) -> jboolean {
    bool_to_jboolean(agent_store().has_active_configuration())
}

/// `isExplicitlyBlocked(host) -> bool`.
#[no_mangle]
pub extern "system" fn Java_io_github_garryjeromson_airgap_ConfigurationStore_isExplicitlyBlocked<'local>(
    mut env: JNIEnv<'local>,
    _class: JClass<'local>,
    host: JString<'local>,
) -> jboolean {
    let Ok(host) = env.get_string(&host) else {
        return JNI_FALSE;
    };
    bool_to_jboolean(agent_store().is_explicitly_blocked(&String::from(host)))
}

const fn bool_to_jboolean(b: bool) -> jboolean {
    if b {
        JNI_TRUE
    } else {
        JNI_FALSE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfiguration;

    #[test]
    fn bool_to_jboolean_matches_jni_convention() {
        assert_eq!(bool_to_jboolean(true), 1);
        assert_eq!(bool_to_jboolean(false), 0);
    }

    #[test]
    fn builder_skips_invalid_patterns_rather_than_failing_whole_set() {
        let patterns = ["example.com", "", "bad pattern", "evil.com"];
        let builder = NetworkConfigurationBuilder::default()
            .allow_all(patterns.into_iter().filter(|p| Pattern::new(*p).is_ok()));
        let cfg: NetworkConfiguration = builder.build();
        assert!(cfg.is_explicitly_allowed("example.com"));
        assert!(cfg.is_explicitly_allowed("evil.com"));
    }
}
