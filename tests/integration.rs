//! Integration tests against a live Cerbos PDP.
//!
//! Requires Cerbos running locally with the test policies below. To start one:
//!   cerbos server --set=storage.driver=disk --set=storage.disk.directory=./policies &
//!
//! Configure via environment variables (defaults shown):
//!   CERBOS_ENDPOINT=http://localhost:3593
//!
//! The tests expect a `document` resource policy that allows `read` for the
//! `employee` role and allows every action when `request.resource.attr.owner`
//! equals the principal id. Run with `cargo test -- --ignored`.

use std::time::Duration;

use arbiter::{CacheConfig, Client, Decision, Principal, Resource, SessionState};

fn endpoint() -> String {
    std::env::var("CERBOS_ENDPOINT").unwrap_or_else(|_| "http://localhost:3593".into())
}

async fn client() -> Client {
    Client::builder(endpoint())
        .connect_timeout(Duration::from_secs(5))
        .cache(CacheConfig::default())
        .build()
        .await
        .expect("failed to connect to Cerbos")
}

fn alice() -> Principal {
    Principal::builder("alice")
        .role("employee")
        .attr("department", "marketing")
        .build()
        .unwrap()
}

fn bob() -> Principal {
    Principal::new("bob", ["employee"]).unwrap()
}

fn alices_doc() -> Resource {
    Resource::builder("document", "doc:42")
        .attr("owner", "alice")
        .build()
        .unwrap()
}

#[tokio::test]
#[ignore = "needs a running Cerbos PDP"]
async fn owner_may_do_everything() {
    let c = client().await;
    let result = c
        .check(&alice(), &alices_doc())
        .actions(["read", "write", "delete"])
        .await
        .expect("check failed");
    for action in ["read", "write", "delete"] {
        assert_eq!(result.decision(action), Some(Decision::Allow), "{action}");
    }
    assert_eq!(c.state(), SessionState::Ready);
}

#[tokio::test]
#[ignore = "needs a running Cerbos PDP"]
async fn other_employees_may_only_read() {
    let c = client().await;
    let result = c
        .check(&bob(), &alices_doc())
        .actions(["read", "write"])
        .await
        .expect("check failed");
    assert!(result.is_allowed("read"));
    assert!(!result.is_allowed("write"));
}

#[tokio::test]
#[ignore = "needs a running Cerbos PDP"]
async fn concurrent_checks_are_batched_and_correlated() {
    let c = client().await;
    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..40 {
        let c = c.clone();
        tasks.spawn(async move {
            let principal = if i % 2 == 0 { alice() } else { bob() };
            let allowed = c
                .is_allowed(&principal, &alices_doc(), "write")
                .await
                .expect("check failed");
            assert_eq!(allowed, i % 2 == 0, "check {i}");
        });
    }
    while let Some(joined) = tasks.join_next().await {
        joined.unwrap();
    }
    let stats = c.stats();
    assert!(stats.batches_dispatched < 40, "{stats:?}");
    assert_eq!(stats.protocol_violations, 0);
}

#[tokio::test]
#[ignore = "needs a running Cerbos PDP"]
async fn check_resources_for_one_principal() {
    let c = client().await;
    let results = c
        .check_resources(
            &bob(),
            [
                (alices_doc(), vec!["read"]),
                (
                    Resource::builder("document", "doc:43")
                        .attr("owner", "bob")
                        .build()
                        .unwrap(),
                    vec!["write"],
                ),
            ],
        )
        .await
        .expect("check_resources failed");
    assert!(results[0].is_allowed("read"));
    assert!(results[1].is_allowed("write"));
}

#[tokio::test]
#[ignore = "needs a running Cerbos PDP"]
async fn repeated_check_is_served_from_cache() {
    let c = client().await;
    let first = c.is_allowed(&alice(), &alices_doc(), "read").await.unwrap();
    let before = c.stats();
    let second = c.is_allowed(&alice(), &alices_doc(), "read").await.unwrap();
    assert_eq!(first, second);
    assert_eq!(c.stats().cache_hits, before.cache_hits + 1);
    assert_eq!(c.stats().batches_dispatched, before.batches_dispatched);
}

#[tokio::test]
async fn plaintext_to_remote_host_is_refused() {
    let err = Client::new("http://cerbos.example.com:3593")
        .await
        .unwrap_err();
    assert!(matches!(err, arbiter::Error::InvalidArgument(_)));
}
