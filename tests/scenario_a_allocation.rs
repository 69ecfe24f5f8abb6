mod common;

use std::collections::BTreeSet;

use common::Harness;
use lmcp_lib::core::instance::LifecycleState;

#[tokio::test]
async fn cluster_build_assigns_distinct_ports_and_secrets() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(dir.path(), common::source()).await;

    let report = harness.engine.build_all().await.unwrap();
    assert!(report.is_success(), "{}", report);
    assert_eq!(report.succeeded, vec!["creative", "survival", "velocity"]);

    let allocations = harness.engine.allocator().snapshot().await;
    assert_eq!(allocations.len(), 3);

    let ports: BTreeSet<u16> = allocations
        .values()
        .flat_map(|a| a.ports.iter().copied())
        .collect();
    assert_eq!(ports.len(), 3, "ports must be pairwise distinct");

    let secrets: BTreeSet<&str> = allocations
        .values()
        .filter_map(|a| a.forwarding_secret.as_deref())
        .collect();
    assert_eq!(secrets.len(), 2, "one distinct secret per backend");
    assert!(allocations["velocity"].forwarding_secret.is_none());

    for name in ["velocity", "survival", "creative"] {
        let instance = harness.engine.instance(name).await.unwrap();
        assert_eq!(instance.state, LifecycleState::Built);
        assert_eq!(instance.allocation.as_ref(), allocations.get(name));
    }

    // The proxy's backend list covers both backends regardless of build order.
    let velocity_toml =
        std::fs::read_to_string(harness.server_dir("velocity").join("config/velocity.toml"))
            .unwrap();
    let parsed: toml::Value = velocity_toml.parse().unwrap();
    let servers = parsed["servers"].as_table().unwrap();
    assert_eq!(servers["survival"].as_str(), Some("demo-survival:25565"));
    assert_eq!(servers["creative"].as_str(), Some("demo-creative:25565"));
}

#[tokio::test]
async fn rebuilding_one_backend_keeps_everyone_elses_allocation() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(dir.path(), common::source()).await;

    harness.engine.build_all().await.unwrap();
    let before = harness.engine.allocator().snapshot().await;

    let creative = harness.engine.build("creative").await.unwrap();
    assert_eq!(creative.state, LifecycleState::Built);

    let after = harness.engine.allocator().snapshot().await;
    assert_eq!(after["survival"], before["survival"]);
    assert_eq!(after["velocity"], before["velocity"]);
    assert_eq!(after["creative"], before["creative"], "rebuild is idempotent");
}

#[tokio::test]
async fn rebuild_preserves_state_subtree() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(dir.path(), common::source()).await;

    harness.engine.build("survival").await.unwrap();
    let world = harness.server_dir("survival").join("state/world/level.dat");
    std::fs::create_dir_all(world.parent().unwrap()).unwrap();
    std::fs::write(&world, b"precious").unwrap();

    harness.engine.build("survival").await.unwrap();
    assert_eq!(std::fs::read(&world).unwrap(), b"precious");
    assert!(harness
        .server_dir("survival")
        .join("config/server.jar")
        .exists());
}
