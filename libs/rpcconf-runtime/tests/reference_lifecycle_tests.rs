#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Reference lifecycle: discovery through the local directory, check/lazy/init
//! handling, sticky selection and release.

mod common;

use std::sync::Arc;

use common::{GatedProxies, Harness, echo_reference, echo_service};
use rpcconf::{ConfigError, Field};
use rpcconf_runtime::{
    Endpoint, ProtocolBindings, ReferenceState, ServiceExport, ServiceReference,
};

async fn export_echo(h: &Harness, group: &str, host: &str) {
    let ctx = h
        .export_ctx()
        .with_bindings(ProtocolBindings::new(host).bind("dubbo", Endpoint::new(host, 20880)));
    // The registry entry outlives the handle; only unexport removes it.
    ServiceExport::new(echo_service(|f| f.with(Field::Group, group)), ctx)
        .export()
        .await
        .unwrap();
}

#[tokio::test]
async fn bind_connects_eagerly_by_default() {
    let h = Harness::new();
    export_echo(&h, "blue", "10.0.0.1").await;

    let reference = ServiceReference::new(
        echo_reference(|f| f.with(Field::Group, "*")),
        h.reference_ctx(),
    );
    assert_eq!(reference.bind().await.unwrap(), ReferenceState::Connected);
    assert_eq!(reference.providers().len(), 1);
    assert_eq!(*h.proxies.connected.lock(), [1]);
}

#[tokio::test]
async fn check_without_provider_fails_bind() {
    let h = Harness::new();
    let reference = ServiceReference::new(echo_reference(|f| f), h.reference_ctx());

    let err = reference.bind().await.unwrap_err();
    assert!(err.is_provider_unavailable());
    assert_eq!(reference.state(), ReferenceState::Resolved);
    assert!(h.proxies.created.lock().is_empty());
}

#[tokio::test]
async fn check_false_binds_without_provider() {
    let h = Harness::new();
    let reference = ServiceReference::new(echo_reference(|f| f.with(Field::Check, false)), h.reference_ctx());
    assert_eq!(reference.bind().await.unwrap(), ReferenceState::Connected);
    assert!(reference.select_provider().is_none());
}

#[tokio::test]
async fn injvm_skips_provider_check() {
    let h = Harness::new();
    let reference = ServiceReference::new(echo_reference(|f| f.with(Field::Injvm, true)), h.reference_ctx());
    assert_eq!(reference.bind().await.unwrap(), ReferenceState::Connected);
}

#[tokio::test]
async fn direct_url_bypasses_directory() {
    let h = Harness::new();
    let reference = ServiceReference::new(
        echo_reference(|f| f.with(Field::Url, "dubbo://10.0.0.7:20880/com.example.Echo")),
        h.reference_ctx(),
    );
    assert_eq!(reference.bind().await.unwrap(), ReferenceState::Connected);

    let provider = reference.select_provider().unwrap();
    assert_eq!(provider.url.host(), "10.0.0.7");
}

#[tokio::test]
async fn injvm_ignores_direct_url() {
    let h = Harness::new();
    let reference = ServiceReference::new(
        echo_reference(|f| f.with(Field::Injvm, true).with(Field::Url, "not a url")),
        h.reference_ctx(),
    );
    assert_eq!(reference.bind().await.unwrap(), ReferenceState::Connected);
    assert!(reference.providers().is_empty());
}

#[tokio::test]
async fn direct_url_without_path_targets_reference_interface() {
    let h = Harness::new();
    let reference = ServiceReference::new(
        echo_reference(|f| f.with(Field::Url, "dubbo://10.0.0.2:20880")),
        h.reference_ctx(),
    );
    reference.bind().await.unwrap();

    let provider = reference.select_provider().unwrap();
    assert_eq!(provider.key.service.interface, "com.example.Echo");
    assert_eq!(provider.key.service.version, "1.0");
    assert_eq!(provider.url.port(), 20880);
}

#[tokio::test]
async fn release_during_create_destroys_the_new_handle() {
    let h = Harness::new();
    let proxies = Arc::new(GatedProxies::default());
    let reference = Arc::new(ServiceReference::new(
        echo_reference(|f| f.with(Field::Check, false)),
        h.reference_ctx_with(proxies.clone()),
    ));

    let bind = tokio::spawn({
        let reference = Arc::clone(&reference);
        async move { reference.bind().await }
    });
    proxies.entered.notified().await;
    reference.release().await.unwrap();
    proxies.gate.notify_one();

    assert_eq!(bind.await.unwrap().unwrap_err(), ConfigError::Cancelled);
    assert_eq!(reference.state(), ReferenceState::Released);
    assert_eq!(proxies.recorded.created.lock().len(), 1);
    assert_eq!(*proxies.recorded.destroyed.lock(), ["com.example.Echo"]);
}

#[tokio::test]
async fn first_call_during_bind_waits_and_connects() {
    let h = Harness::new();
    export_echo(&h, "", "10.0.0.1").await;
    let proxies = Arc::new(GatedProxies::default());
    let reference = Arc::new(ServiceReference::new(
        echo_reference(|f| f.with(Field::Lazy, true)),
        h.reference_ctx_with(proxies.clone()),
    ));

    let bind = tokio::spawn({
        let reference = Arc::clone(&reference);
        async move { reference.bind().await }
    });
    proxies.entered.notified().await;
    let first_call = tokio::spawn({
        let reference = Arc::clone(&reference);
        async move { reference.on_first_call().await }
    });
    tokio::task::yield_now().await;
    assert!(!first_call.is_finished());
    proxies.gate.notify_one();

    assert_eq!(bind.await.unwrap().unwrap(), ReferenceState::Deferred);
    first_call.await.unwrap().unwrap();
    assert_eq!(reference.state(), ReferenceState::Connected);
    assert_eq!(*proxies.recorded.connected.lock(), [1]);
    assert_eq!(proxies.recorded.created.lock().len(), 1);
}

#[tokio::test]
async fn overlapping_binds_share_one_outcome() {
    let h = Harness::new();
    export_echo(&h, "", "10.0.0.1").await;
    let proxies = Arc::new(GatedProxies::default());
    let reference = Arc::new(ServiceReference::new(
        echo_reference(|f| f),
        h.reference_ctx_with(proxies.clone()),
    ));

    let spawn_bind = || {
        let reference = Arc::clone(&reference);
        tokio::spawn(async move { reference.bind().await })
    };
    let first = spawn_bind();
    proxies.entered.notified().await;
    let second = spawn_bind();
    tokio::task::yield_now().await;
    proxies.gate.notify_one();

    assert_eq!(first.await.unwrap().unwrap(), ReferenceState::Connected);
    assert_eq!(second.await.unwrap().unwrap(), ReferenceState::Connected);
    assert_eq!(proxies.recorded.created.lock().len(), 1);
}

#[tokio::test]
async fn lazy_reference_defers_until_first_call() {
    let h = Harness::new();
    export_echo(&h, "", "10.0.0.1").await;
    let reference = ServiceReference::new(echo_reference(|f| f.with(Field::Lazy, true)), h.reference_ctx());

    assert_eq!(reference.bind().await.unwrap(), ReferenceState::Deferred);
    assert!(h.proxies.connected.lock().is_empty());
    assert!(reference.select_provider().is_none());

    reference.on_first_call().await.unwrap();
    assert_eq!(reference.state(), ReferenceState::Connected);
    reference.on_first_call().await.unwrap();
    assert_eq!(h.proxies.connected.lock().len(), 1);
}

#[tokio::test]
async fn init_overrides_lazy() {
    let h = Harness::new();
    export_echo(&h, "", "10.0.0.1").await;
    let reference = ServiceReference::new(
        echo_reference(|f| f.with(Field::Lazy, true).with(Field::Init, true)),
        h.reference_ctx(),
    );
    assert_eq!(reference.bind().await.unwrap(), ReferenceState::Connected);
}

#[tokio::test]
async fn first_call_binds_an_unbound_reference() {
    let h = Harness::new();
    export_echo(&h, "", "10.0.0.1").await;
    let reference = ServiceReference::new(echo_reference(|f| f.with(Field::Sticky, true)), h.reference_ctx());

    reference.on_first_call().await.unwrap();
    assert_eq!(reference.state(), ReferenceState::Connected);
}

#[tokio::test]
async fn sticky_reference_is_lazy_and_keeps_its_provider() {
    let h = Harness::new();
    export_echo(&h, "blue", "10.0.0.1").await;
    export_echo(&h, "green", "10.0.0.2").await;
    let reference = ServiceReference::new(
        echo_reference(|f| f.with(Field::Group, "*").with(Field::Sticky, true)),
        h.reference_ctx(),
    );

    assert_eq!(reference.bind().await.unwrap(), ReferenceState::Deferred);
    reference.on_first_call().await.unwrap();

    let first = reference.select_provider().unwrap();
    for _ in 0..5 {
        assert_eq!(reference.select_provider().unwrap(), first);
    }
}

#[tokio::test]
async fn non_sticky_reference_rotates_providers() {
    let h = Harness::new();
    export_echo(&h, "blue", "10.0.0.1").await;
    export_echo(&h, "green", "10.0.0.2").await;
    let reference = ServiceReference::new(echo_reference(|f| f.with(Field::Group, "*")), h.reference_ctx());
    reference.bind().await.unwrap();

    let a = reference.select_provider().unwrap();
    let b = reference.select_provider().unwrap();
    assert_ne!(a, b);
}

#[tokio::test]
async fn release_is_idempotent() {
    let h = Harness::new();
    export_echo(&h, "", "10.0.0.1").await;
    let reference = ServiceReference::new(echo_reference(|f| f), h.reference_ctx());
    reference.bind().await.unwrap();

    reference.release().await.unwrap();
    reference.release().await.unwrap();

    assert_eq!(reference.state(), ReferenceState::Released);
    assert_eq!(*h.proxies.destroyed.lock(), ["com.example.Echo"]);
    assert!(reference.select_provider().is_none());
    assert_eq!(reference.bind().await.unwrap_err(), ConfigError::Cancelled);
    assert_eq!(reference.on_first_call().await.unwrap_err(), ConfigError::Cancelled);
}

#[tokio::test]
async fn release_before_bind_touches_no_proxy() {
    let h = Harness::new();
    let reference = ServiceReference::new(echo_reference(|f| f), h.reference_ctx());
    reference.release().await.unwrap();
    assert!(h.proxies.destroyed.lock().is_empty());
}
