//! Property-based coverage of `spec.md` §8's testable properties, driven
//! through the public crate surface rather than `store`'s own `#[cfg(test)]`
//! module — these exercise the crate the way an external adapter would see
//! it, including the pure `ffi::wrappers` decision functions no internal
//! unit test reaches from outside `ffi`.

use airgap_agent::config::{CallerTag, NetworkConfiguration};
use airgap_agent::ffi::wrappers::{decide_connect, decide_dns};
use airgap_agent::store::ConfigurationStore;
use proptest::prelude::*;

fn arb_label() -> impl Strategy<Value = String> {
    "[a-z]{1,8}"
}

fn arb_host() -> impl Strategy<Value = String> {
    proptest::collection::vec(arb_label(), 1..4).prop_map(|labels| labels.join("."))
}

proptest! {
    /// P1: with an active, empty configuration, every host not covered by
    /// loopback is blocked.
    #[test]
    fn p1_unmatched_host_always_blocked(host in arb_host()) {
        prop_assume!(host != "localhost" && host != "127.0.0.1" && host != "::1");
        let store = ConfigurationStore::default();
        store.set_configuration(NetworkConfiguration::empty());
        prop_assert!(store.check_connection(&host, 80, CallerTag::NativeAgent, &[]).is_err());
    }

    /// P2: any host matching an allow pattern passes, regardless of shape.
    #[test]
    fn p2_allow_listed_host_always_passes(host in arb_host()) {
        let store = ConfigurationStore::default();
        store.set_configuration(NetworkConfiguration::builder().allow(&host).build());
        prop_assert!(store.check_connection(&host, 443, CallerTag::NativeAgent, &[]).is_ok());
    }

    /// P3: an explicit block always beats an explicit allow for the same host,
    /// no matter how permissive the allow side is.
    #[test]
    fn p3_block_beats_allow_even_under_wildcard(host in arb_host()) {
        let store = ConfigurationStore::default();
        store.set_configuration(
            NetworkConfiguration::builder().allow("*").block(&host).build(),
        );
        prop_assert!(store.check_connection(&host, 80, CallerTag::NativeAgent, &[]).is_err());
    }

    /// P9: the connect wrapper's IP/hostname precedence never allows a
    /// connection neither half explicitly permits.
    #[test]
    fn p9_decide_connect_never_allows_unlisted_pair(ip in arb_host(), hostname in arb_host()) {
        prop_assume!(ip != hostname);
        let store = ConfigurationStore::default();
        store.set_configuration(NetworkConfiguration::empty());
        let result = decide_connect(&store, Some(&ip), Some(&hostname), 80, CallerTag::NativeAgent, &[]);
        prop_assert!(result.is_err());
    }

    /// P9: if either half is explicitly allowed, the connection is permitted.
    #[test]
    fn p9_decide_connect_allows_if_either_half_listed(ip in arb_host(), hostname in arb_host()) {
        prop_assume!(ip != hostname);
        let store = ConfigurationStore::default();
        store.set_configuration(NetworkConfiguration::builder().allow(&hostname).build());
        let result = decide_connect(&store, Some(&ip), Some(&hostname), 80, CallerTag::NativeAgent, &[]);
        prop_assert!(result.is_ok());
    }

    /// P10: a block's caller tag always appears verbatim in the rendered
    /// message, for every tag the decision engine can produce.
    #[test]
    fn p10_caller_tag_appears_verbatim(host in arb_host()) {
        let store = ConfigurationStore::default();
        store.set_configuration(NetworkConfiguration::empty());
        for tag in [CallerTag::NativeAgent, CallerTag::NativeDns, CallerTag::ManagedApi, CallerTag::Unknown] {
            let err = store.check_connection(&host, 80, tag, &[]).unwrap_err();
            prop_assert!(err.to_string().contains(tag.as_str()));
        }
    }
}

#[test]
fn p5_dns_wrapper_always_uses_negative_port_and_dns_tag() {
    let store = ConfigurationStore::default();
    store.set_configuration(NetworkConfiguration::empty());
    let err = decide_dns(&store, "example.com", &[]).unwrap_err();
    assert_eq!(err.port(), -1);
    assert_eq!(err.caller_tag(), CallerTag::NativeDns);
}

#[test]
fn p8_no_active_configuration_is_always_permissive() {
    let store = ConfigurationStore::default();
    assert!(store
        .check_connection("anything.example.com", 80, CallerTag::NativeAgent, &[])
        .is_ok());
    assert!(decide_dns(&store, "anything.example.com", &[]).is_ok());
}
