mod common;

use std::collections::BTreeMap;
use std::path::Path;

use chrono::Utc;
use common::Harness;
use lmcp_lib::core::error::{AllocationError, LmcpError};
use lmcp_lib::core::instance::LifecycleState;
use lmcp_lib::core::monitor::{MonitoringAggregator, RuntimeStatus};
use lmcp_lib::core::network::{NetworkAllocation, NetworkAllocator, NetworkTable};
use lmcp_lib::core::runtime::ContainerState;

#[tokio::test]
async fn start_failure_is_recorded_verbatim() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(dir.path(), common::source()).await;
    harness
        .runtime
        .fail_on("start", "creative", "Error: image not known");

    let report = harness.engine.up().await.unwrap();
    assert_eq!(report.succeeded, vec!["survival", "velocity"]);
    let failure = report.failure("creative").unwrap();
    assert!(failure.error.contains("Error: image not known"));

    let creative = harness.engine.instance("creative").await.unwrap();
    assert_eq!(creative.state, LifecycleState::Error);
    assert!(creative
        .last_error
        .as_deref()
        .unwrap()
        .contains("Error: image not known"));

    // Retrying after the runtime recovers starts it from Error.
    harness.runtime.clear_failures();
    let retry = harness.engine.up().await.unwrap();
    assert!(retry.is_success(), "{}", retry);
    assert_eq!(
        harness.engine.instance("creative").await.unwrap().state,
        LifecycleState::Running
    );
}

#[tokio::test]
async fn remove_releases_ports_and_keeps_world_data() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(dir.path(), common::source()).await;
    harness.engine.build_all().await.unwrap();

    let world = harness.server_dir("creative").join("state/world/level.dat");
    std::fs::create_dir_all(world.parent().unwrap()).unwrap();
    std::fs::write(&world, b"precious").unwrap();

    harness.engine.remove("creative", false).await.unwrap();
    assert!(harness.engine.allocator().get("creative").await.is_none());
    assert!(harness.engine.instance("creative").await.is_err());
    assert!(!harness.server_dir("creative").join("config").exists());
    assert_eq!(std::fs::read(&world).unwrap(), b"precious");

    let listed = harness.engine.instances().await.unwrap();
    let creative = listed.iter().find(|i| i.name == "creative").unwrap();
    assert_eq!(creative.state, LifecycleState::Unbuilt);
}

#[tokio::test]
async fn running_servers_cannot_be_removed() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(dir.path(), common::source()).await;
    harness.engine.up().await.unwrap();

    assert!(harness.engine.remove("survival", true).await.is_err());
    assert_eq!(
        harness.engine.instance("survival").await.unwrap().state,
        LifecycleState::Running
    );
}

#[tokio::test]
async fn hand_edited_and_pinned_files_survive_rebuild() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(dir.path(), common::source()).await;
    harness.engine.build("survival").await.unwrap();

    let properties = harness.server_dir("survival").join("config/server.properties");
    let edited = "motd=hand edited\n";
    std::fs::write(&properties, edited).unwrap();
    harness.engine.build("survival").await.unwrap();
    assert_eq!(std::fs::read_to_string(&properties).unwrap(), edited);

    let pinned = harness
        .engine
        .pin("survival", Path::new("server.properties"))
        .await
        .unwrap();
    assert!(pinned.pinned_files.contains(Path::new("server.properties")));
    assert!(harness
        .engine
        .pin("survival", Path::new("../escape"))
        .await
        .is_err());

    let unpinned = harness
        .engine
        .unpin("survival", Path::new("server.properties"))
        .await
        .unwrap();
    assert!(unpinned.pinned_files.is_empty());
}

#[tokio::test]
async fn monitor_reports_crashed_container_without_touching_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(dir.path(), common::source()).await;
    harness.engine.up().await.unwrap();
    harness
        .runtime
        .set_state("survival", ContainerState::Exited(Some(137)));

    let monitor = MonitoringAggregator::new(
        harness.engine.runtime().clone(),
        harness.engine.instance_manager().clone(),
        harness.engine.logs().clone(),
    );
    let snapshot = monitor.poll(harness.engine.cluster()).await.unwrap();

    let survival = snapshot.server("survival").unwrap();
    assert_eq!(survival.runtime, RuntimeStatus::Exited(Some(137)));
    assert!(survival.is_diverged());
    assert!(survival.port.is_some());
    assert_eq!(
        harness.engine.instance("survival").await.unwrap().state,
        LifecycleState::Running
    );
    assert!(snapshot.host.memory_total_bytes > 0);
}

#[tokio::test]
async fn exhausted_port_range_fails_only_the_server_left_without_a_port() {
    let dir = tempfile::tempdir().unwrap();
    // Two ports for three servers.
    let harness = Harness::with_allocator(
        dir.path(),
        common::source(),
        NetworkAllocator::in_memory(25566, 25567),
    )
    .await;

    let report = harness.engine.build_all().await.unwrap();
    assert_eq!(report.succeeded.len(), 2, "{}", report);
    assert_eq!(report.failed.len(), 1, "{}", report);
    let failed = &report.failed[0];
    assert!(failed.error.contains("exhausted"), "{}", failed.error);

    for name in ["velocity", "survival", "creative"] {
        let instance = harness.engine.instance(name).await.unwrap();
        if name == failed.server {
            assert_eq!(instance.state, LifecycleState::Error);
            assert!(harness.engine.allocator().get(name).await.is_none());
        } else {
            assert_eq!(instance.state, LifecycleState::Built);
            assert!(harness.server_dir(name).join("config/server.jar").exists());
        }
    }
}

#[tokio::test]
async fn corrupt_allocation_table_aborts_the_whole_build() {
    let dir = tempfile::tempdir().unwrap();
    let allocation = |server: &str| NetworkAllocation {
        server: server.into(),
        ports: vec![25566],
        forwarding_secret: None,
        hostname: format!("demo-{}", server),
        fixed: false,
        allocated_at: Utc::now(),
    };
    let mut table = NetworkTable::new(25566, 25665);
    table.allocations = BTreeMap::from([
        ("survival".to_string(), allocation("survival")),
        ("creative".to_string(), allocation("creative")),
    ]);
    let harness = Harness::with_allocator(
        dir.path(),
        common::source(),
        NetworkAllocator::from_table(table, None),
    )
    .await;

    let err = harness.engine.build_all().await.unwrap_err();
    assert!(err.is_cluster_fatal());
    assert!(matches!(
        err,
        LmcpError::Allocation(AllocationError::CorruptTable(_))
    ));
    for instance in harness.engine.instances().await.unwrap() {
        assert_ne!(instance.state, LifecycleState::Building);
        assert_ne!(instance.state, LifecycleState::Built);
    }
    assert!(harness.runtime.calls().is_empty());
}

#[tokio::test]
async fn dependency_names_cannot_reach_into_world_data() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(dir.path(), common::source()).await;
    let mut template = common::backend_template("survival");
    template.dependencies[0].name = "../../state/world/level".into();
    template
        .save(&dir.path().join("templates/survival.toml"))
        .unwrap();

    let err = harness.engine.build("survival").await.unwrap_err();
    assert!(matches!(err, LmcpError::Validation(_)), "{}", err);
    assert!(!harness
        .server_dir("survival")
        .join("state/world/level-5.4.102.jar")
        .exists());
    assert_eq!(
        harness.engine.instance("survival").await.unwrap().state,
        LifecycleState::Error
    );
}
