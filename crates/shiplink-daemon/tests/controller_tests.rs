//! Integration tests for the deploy controller
//!
//! Drives `DeployController` directly against the in-process loopback link:
//! build completions, the single-flight gate, the connection wait, extension
//! hooks and the per-connection work.

use async_trait::async_trait;
use shiplink_core::{Config, DistributeTarget};
use shiplink_daemon::controller::{BuildOutcome, DeployController};
use shiplink_daemon::extensions::{Extension, ExtensionSet, HookContext};
use shiplink_daemon::queue::DeployPhase;
use shiplink_daemon::remote::{MemoryLink, RemoteLink};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Extension that records every hook it sees
struct Recorder {
    events: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    fn push(&self, hook: &str) {
        self.events.lock().unwrap().push(hook.to_string());
    }
}

#[async_trait]
impl Extension for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    async fn setup(&self, _cx: &HookContext) -> anyhow::Result<()> {
        self.push("setup");
        Ok(())
    }

    async fn before_connect(&self, _cx: &HookContext) -> anyhow::Result<()> {
        self.push("before_connect");
        Ok(())
    }

    async fn after_connect(&self, _cx: &HookContext) -> anyhow::Result<()> {
        self.push("after_connect");
        Ok(())
    }

    async fn before_build(&self, _cx: &HookContext) -> anyhow::Result<()> {
        self.push("before_build");
        Ok(())
    }

    async fn after_build(&self, _cx: &HookContext) -> anyhow::Result<()> {
        self.push("after_build");
        Ok(())
    }

    async fn before_distribute(&self, _cx: &HookContext) -> anyhow::Result<()> {
        self.push("before_distribute");
        Ok(())
    }

    async fn after_distribute(&self, _cx: &HookContext) -> anyhow::Result<()> {
        self.push("after_distribute");
        Ok(())
    }
}

/// Extension that fails every hook it implements
struct Exploder;

#[async_trait]
impl Extension for Exploder {
    fn name(&self) -> &str {
        "exploder"
    }

    async fn setup(&self, _cx: &HookContext) -> anyhow::Result<()> {
        anyhow::bail!("setup exploded")
    }

    async fn before_build(&self, _cx: &HookContext) -> anyhow::Result<()> {
        anyhow::bail!("before_build exploded")
    }

    async fn after_build(&self, _cx: &HookContext) -> anyhow::Result<()> {
        anyhow::bail!("after_build exploded")
    }

    async fn after_connect(&self, _cx: &HookContext) -> anyhow::Result<()> {
        anyhow::bail!("after_connect exploded")
    }
}

fn base_config(output_dir: PathBuf) -> Config {
    Config {
        port: 8040,
        output_dir,
        types: None,
        use_polling: false,
        build: None,
        mirror: Vec::new(),
        distribute: Vec::new(),
    }
}

fn write_output(output_dir: &Path, server: &str, filename: &str, content: &str) {
    let path = output_dir.join(server).join(filename);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn controller_with(
    config: Config,
    link: &Arc<MemoryLink>,
    extensions: ExtensionSet,
) -> Arc<DeployController> {
    Arc::new(DeployController::new(
        Arc::new(config),
        Arc::clone(link) as Arc<dyn RemoteLink>,
        extensions,
    ))
}

fn recording_set(events: &Arc<Mutex<Vec<String>>>) -> ExtensionSet {
    let mut extensions = ExtensionSet::new();
    extensions.register(Arc::new(Recorder {
        events: events.clone(),
    }));
    extensions
}

#[tokio::test]
async fn test_successful_build_pushes_every_output_file() {
    let temp = TempDir::new().unwrap();
    let out = temp.path().join("out");
    write_output(&out, "home", "app.js", "console.log(1);");
    write_output(&out, "home", "lib/util.js", "export {};");
    write_output(&out, "worker-1", "job.js", "run();");

    let link = Arc::new(MemoryLink::new());
    link.connect_client();
    let controller = controller_with(base_config(out), &link, ExtensionSet::new());

    controller.build_finished(&BuildOutcome::default()).await;

    assert_eq!(
        link.file("home", "app.js").as_deref(),
        Some("console.log(1);")
    );
    assert_eq!(link.file("home", "lib/util.js").as_deref(), Some("export {};"));
    assert_eq!(link.file("worker-1", "job.js").as_deref(), Some("run();"));
    assert_eq!(link.ram_calls().len(), 3, "every pushed file gets a cost");
    assert_eq!(controller.queue().phase(), DeployPhase::Idle);
}

#[tokio::test]
async fn test_build_with_errors_deploys_nothing() {
    let temp = TempDir::new().unwrap();
    let out = temp.path().join("out");
    write_output(&out, "home", "stale.js", "old");

    let link = Arc::new(MemoryLink::new());
    link.connect_client();
    let controller = controller_with(base_config(out), &link, ExtensionSet::new());

    controller.build_finished(&BuildOutcome { errors: 2 }).await;

    assert!(link.push_calls().is_empty(), "no push for a broken build");
    assert!(link.ram_calls().is_empty());
    assert_eq!(controller.queue().phase(), DeployPhase::Idle);
}

#[tokio::test]
async fn test_second_build_dropped_while_deploy_in_flight() {
    let temp = TempDir::new().unwrap();
    let out = temp.path().join("out");
    write_output(&out, "home", "app.js", "v1");

    let link = Arc::new(MemoryLink::new());
    link.connect_client();
    link.set_push_latency(80);
    let controller = controller_with(base_config(out), &link, ExtensionSet::new());

    let first = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move { controller.build_finished(&BuildOutcome::default()).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(controller.queue().phase(), DeployPhase::Pushing);

    // Completes immediately: the gate is busy and the result is dropped
    controller.build_finished(&BuildOutcome::default()).await;

    first.await.unwrap();
    assert_eq!(link.push_calls().len(), 1, "second build result was dropped");
    assert_eq!(controller.queue().phase(), DeployPhase::Idle);
}

#[tokio::test]
async fn test_deploy_waits_for_client_then_ships_latest_output() {
    let temp = TempDir::new().unwrap();
    let out = temp.path().join("out");
    write_output(&out, "home", "app.js", "first");

    let link = Arc::new(MemoryLink::new());
    let controller = controller_with(base_config(out.clone()), &link, ExtensionSet::new());

    let deploy = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move { controller.build_finished(&BuildOutcome::default()).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(controller.queue().phase(), DeployPhase::WaitingForClient);
    assert!(link.push_calls().is_empty());

    // A newer build lands while the deploy is suspended
    write_output(&out, "home", "app.js", "second");

    link.connect_client();
    deploy.await.unwrap();

    assert_eq!(
        link.file("home", "app.js").as_deref(),
        Some("second"),
        "connecting ships the latest output"
    );
    assert_eq!(link.push_calls().len(), 1);
}

#[tokio::test]
async fn test_push_failure_releases_gate_for_next_build() {
    let temp = TempDir::new().unwrap();
    let out = temp.path().join("out");
    write_output(&out, "home", "app.js", "v1");

    let link = Arc::new(MemoryLink::new());
    link.connect_client();
    link.set_fail_push(true);
    let controller = controller_with(base_config(out), &link, ExtensionSet::new());

    controller.build_finished(&BuildOutcome::default()).await;
    assert_eq!(
        controller.queue().phase(),
        DeployPhase::Idle,
        "gate released on failure"
    );
    assert_eq!(link.file_count(), 0);

    link.set_fail_push(false);
    controller.build_finished(&BuildOutcome::default()).await;
    assert_eq!(link.file("home", "app.js").as_deref(), Some("v1"));
}

#[tokio::test]
async fn test_failing_extension_does_not_block_deploy_or_siblings() {
    let temp = TempDir::new().unwrap();
    let out = temp.path().join("out");

    let events = Arc::new(Mutex::new(Vec::new()));
    let mut extensions = ExtensionSet::new();
    extensions.register(Arc::new(Exploder));
    extensions.register(Arc::new(Recorder {
        events: events.clone(),
    }));

    let link = Arc::new(MemoryLink::new());
    link.connect_client();
    let controller = controller_with(base_config(out.clone()), &link, extensions);

    controller.build_started().await;
    write_output(&out, "home", "app.js", "x");
    controller.build_finished(&BuildOutcome::default()).await;

    assert_eq!(link.file("home", "app.js").as_deref(), Some("x"));
    let seen = events.lock().unwrap().clone();
    assert!(seen.contains(&"before_build".to_string()));
    assert!(seen.contains(&"after_build".to_string()));
}

#[tokio::test]
async fn test_after_build_hook_skipped_when_cycle_fails() {
    let temp = TempDir::new().unwrap();
    let out = temp.path().join("out");
    write_output(&out, "home", "app.js", "x");

    let events = Arc::new(Mutex::new(Vec::new()));
    let link = Arc::new(MemoryLink::new());
    link.connect_client();
    link.set_fail_ram(true);
    let controller = controller_with(base_config(out), &link, recording_set(&events));

    controller.build_finished(&BuildOutcome::default()).await;

    let seen = events.lock().unwrap().clone();
    assert!(
        !seen.contains(&"after_build".to_string()),
        "after_build only fires on a fully successful cycle"
    );
    assert_eq!(controller.queue().phase(), DeployPhase::Idle);
}

#[tokio::test]
async fn test_connection_work_runs_hooks_export_and_distribution() {
    let temp = TempDir::new().unwrap();
    let out = temp.path().join("out");
    let lib = temp.path().join("shared/lib.js");
    std::fs::create_dir_all(lib.parent().unwrap()).unwrap();
    std::fs::write(&lib, "shared").unwrap();

    let mut config = base_config(out);
    config.types = Some(temp.path().join("types/runtime.d.ts"));
    config.distribute = vec![DistributeTarget {
        local_path: lib,
        servers: vec!["home".to_string(), "worker-1".to_string()],
    }];

    let events = Arc::new(Mutex::new(Vec::new()));
    let link = Arc::new(MemoryLink::new());
    link.set_definition("declare const runtime: Runtime;");
    link.connect_client();
    let controller = controller_with(config, &link, recording_set(&events));

    controller.setup().await;
    controller.before_connect().await;
    controller.client_connected().await;

    let defs = std::fs::read_to_string(temp.path().join("types/runtime.d.ts")).unwrap();
    assert_eq!(defs, "declare const runtime: Runtime;");

    assert_eq!(link.file("home", "lib.js").as_deref(), Some("shared"));
    assert_eq!(link.file("worker-1", "lib.js").as_deref(), Some("shared"));

    let seen = events.lock().unwrap().clone();
    let position = |hook: &str| {
        seen.iter()
            .position(|e| e == hook)
            .unwrap_or_else(|| panic!("{hook} was not dispatched"))
    };
    assert!(position("setup") < position("before_connect"));
    assert!(position("before_connect") < position("after_connect"));
    assert!(position("after_connect") < position("before_distribute"));
    assert!(position("before_distribute") < position("after_distribute"));
}

#[tokio::test]
async fn test_distribution_failure_skips_after_distribute() {
    let temp = TempDir::new().unwrap();
    let lib = temp.path().join("lib.js");
    std::fs::write(&lib, "x").unwrap();

    let mut config = base_config(temp.path().join("out"));
    config.distribute = vec![DistributeTarget {
        local_path: lib,
        servers: vec!["home".to_string()],
    }];

    let events = Arc::new(Mutex::new(Vec::new()));
    let link = Arc::new(MemoryLink::new());
    link.connect_client();
    link.set_fail_distribute(true);
    let controller = controller_with(config, &link, recording_set(&events));

    controller.client_connected().await;

    let seen = events.lock().unwrap().clone();
    assert!(seen.contains(&"before_distribute".to_string()));
    assert!(
        !seen.contains(&"after_distribute".to_string()),
        "after_distribute skipped when the fan-out fails"
    );
}

#[tokio::test]
async fn test_connection_without_distribute_config_skips_those_hooks() {
    let temp = TempDir::new().unwrap();
    let events = Arc::new(Mutex::new(Vec::new()));
    let link = Arc::new(MemoryLink::new());
    link.connect_client();
    let controller = controller_with(
        base_config(temp.path().join("out")),
        &link,
        recording_set(&events),
    );

    controller.client_connected().await;

    let seen = events.lock().unwrap().clone();
    assert!(seen.contains(&"after_connect".to_string()));
    assert!(!seen.contains(&"before_distribute".to_string()));
    assert!(!seen.contains(&"after_distribute".to_string()));
}

#[tokio::test]
async fn test_status_artifact_records_push() {
    let temp = TempDir::new().unwrap();
    let out = temp.path().join("out");
    write_output(&out, "home", "app.js", "a");
    write_output(&out, "worker-1", "job.js", "b");

    let link = Arc::new(MemoryLink::new());
    link.connect_client();
    let controller = controller_with(base_config(out), &link, ExtensionSet::new());

    controller.build_finished(&BuildOutcome::default()).await;

    let text = std::fs::read_to_string(temp.path().join(".shiplink-status.json")).unwrap();
    let status: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(status["port"], 8040);
    assert_eq!(status["connected"], true);
    assert_eq!(status["last_push"]["files"], 2);
}
