//! The six literal end-to-end scenarios from `spec.md` §8, exercised
//! against the public crate surface. A "Socket" attempt is modeled as a
//! call to [`ConfigurationStore::check_connection`] — the actual socket
//! syscall is out of scope for this core (`spec.md` §1: "the interception
//! core" stops at deciding and raising, not at owning a live connection).

use airgap_agent::config::{CallerTag, NetworkConfiguration};
use airgap_agent::lifecycle::{after_test, before_test};
use airgap_agent::store::ConfigurationStore;

#[test]
fn scenario_1_empty_configuration_blocks_arbitrary_host() {
    let store = ConfigurationStore::default();
    before_test(&store, NetworkConfiguration::empty());

    let err = store
        .check_connection("example.com", 80, CallerTag::NativeAgent, &[])
        .unwrap_err();
    assert!(err.host().contains("example.com"));
}

#[test]
fn scenario_2_loopback_allowed_others_blocked() {
    let store = ConfigurationStore::default();
    before_test(
        &store,
        NetworkConfiguration::builder()
            .allow("localhost")
            .allow("127.0.0.1")
            .build(),
    );

    assert!(store
        .check_connection("localhost", 54321, CallerTag::NativeAgent, &[])
        .is_ok());
    assert!(store
        .check_connection("example.com", 80, CallerTag::NativeAgent, &[])
        .is_err());
}

#[test]
fn scenario_3_block_list_beats_wildcard_allow() {
    let store = ConfigurationStore::default();
    before_test(
        &store,
        NetworkConfiguration::builder()
            .allow("*")
            .block("evil.com")
            .block("malicious.example.com")
            .build(),
    );

    assert!(store
        .check_connection("evil.com", 80, CallerTag::NativeAgent, &[])
        .is_err());
    assert!(store
        .check_connection("example.com", 80, CallerTag::NativeAgent, &[])
        .is_ok());
}

#[test]
fn scenario_4_subdomain_wildcard_excludes_apex() {
    let store = ConfigurationStore::default();
    before_test(
        &store,
        NetworkConfiguration::builder().allow("*.example.com").build(),
    );

    assert!(store
        .check_connection("example.com", 80, CallerTag::NativeAgent, &[])
        .is_err());
    assert!(store
        .check_connection("a.example.com", 80, CallerTag::NativeAgent, &[])
        .is_ok());
}

#[test]
fn scenario_5_dns_resolution_blocked_with_negative_port() {
    let store = ConfigurationStore::default();
    before_test(&store, NetworkConfiguration::empty());

    let err = store
        .check_connection("example.com", -1, CallerTag::NativeDns, &[])
        .unwrap_err();
    assert_eq!(err.port(), -1);
    assert_eq!(err.caller_tag(), CallerTag::NativeDns);
    assert!(err.to_string().contains("example.com"));
}

#[test]
fn scenario_5_managed_api_fallback_tag_also_valid() {
    let store = ConfigurationStore::default();
    before_test(&store, NetworkConfiguration::empty());

    let err = store
        .check_connection("example.com", -1, CallerTag::ManagedApi, &[])
        .unwrap_err();
    assert_eq!(err.caller_tag(), CallerTag::ManagedApi);
}

#[test]
fn scenario_6_child_spawned_after_teardown_sees_no_configuration() {
    use std::sync::Arc;

    let store = Arc::new(ConfigurationStore::default());
    before_test(&store, NetworkConfiguration::builder().block_all(["*"]).build());

    let child_store = Arc::clone(&store);
    let handle = store.spawn_inherited(move || {
        after_test(&child_store);
        child_store.get_configuration().is_none()
    });
    assert!(handle.join().unwrap());
}
