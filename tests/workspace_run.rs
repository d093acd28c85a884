// tests/workspace_run.rs

#![cfg(unix)]

mod common;
use crate::common::init_tracing;
use crate::common::scripts::write_task_script;

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use tokio::time::{sleep, timeout};

use taskdag::config::loader::canonical_config_path;
use taskdag::graph::Jobs;
use taskdag::workspace::{ScriptOptions, Workspace, WorkspaceOptions, WorkspaceStatus};

fn options(roots: Vec<PathBuf>, watch_mode: bool) -> WorkspaceOptions {
    WorkspaceOptions {
        roots,
        jobs: Jobs::Unlimited,
        watch_mode,
        script_options: ScriptOptions::default(),
    }
}

#[tokio::test]
async fn runs_dependencies_before_dependants() {
    init_tracing();
    let dir = tempfile::tempdir().expect("tempdir");
    let log = dir.path().join("run.log");

    let leaf = write_task_script(
        dir.path(),
        "leaf.sh",
        r#"{"name":"leaf"}"#,
        "echo leaf >> run.log\necho leaf-output",
    );
    let root = write_task_script(
        dir.path(),
        "root.sh",
        r#"{"name":"root","deps":["./leaf.sh"]}"#,
        "echo root >> run.log",
    );

    let (mut workspace, _events) = Workspace::new(options(vec![root.clone()], false));
    timeout(Duration::from_secs(10), workspace.run())
        .await
        .expect("workspace should settle")
        .expect("run should not error");

    assert_eq!(workspace.workspace_status(), WorkspaceStatus::Ok);

    // Dependency ran first.
    let log_contents = fs::read_to_string(&log).expect("run log");
    assert_eq!(log_contents, "leaf\nroot\n");

    // Child output was captured per project, in arrival order.
    let leaf_project = workspace
        .project(&canonical_config_path(&leaf))
        .expect("leaf project");
    assert!(leaf_project.output().contains("leaf-output"));
    assert_eq!(leaf_project.exit_code(), Some(0));
    assert!(leaf_project.started_at_ms().is_some());
    assert!(leaf_project.stopped_at_ms().is_some());

    // Dependants come before dependencies in display order.
    let ordered: Vec<String> = workspace
        .bfs_projects()
        .iter()
        .map(|p| p.name())
        .collect();
    assert_eq!(ordered, ["root", "leaf"]);

    let root_deps = workspace.direct_dependencies(&canonical_config_path(&root));
    assert_eq!(root_deps.len(), 1);
    assert_eq!(root_deps[0].config_path(), &canonical_config_path(&leaf));
}

#[tokio::test]
async fn failed_dependency_blocks_its_dependants() {
    init_tracing();
    let dir = tempfile::tempdir().expect("tempdir");
    let log = dir.path().join("run.log");

    let leaf = write_task_script(
        dir.path(),
        "leaf.sh",
        r#"{"name":"leaf"}"#,
        "echo leaf >> run.log\necho boom >&2\nexit 1",
    );
    let root = write_task_script(
        dir.path(),
        "root.sh",
        r#"{"deps":["./leaf.sh"]}"#,
        "echo root >> run.log",
    );

    let (mut workspace, _events) = Workspace::new(options(vec![root], false));
    timeout(Duration::from_secs(10), workspace.run())
        .await
        .expect("workspace should settle")
        .expect("run should not error");

    assert_eq!(workspace.workspace_status(), WorkspaceStatus::Fail);

    // The dependant never ran.
    let log_contents = fs::read_to_string(&log).expect("run log");
    assert_eq!(log_contents, "leaf\n");

    let leaf_project = workspace
        .project(&canonical_config_path(&leaf))
        .expect("leaf project");
    assert_eq!(leaf_project.exit_code(), Some(1));
    assert!(leaf_project.output().contains("boom"));
}

#[tokio::test]
async fn broken_configuration_fails_with_the_load_error_as_output() {
    init_tracing();
    let dir = tempfile::tempdir().expect("tempdir");

    let root = write_task_script(
        dir.path(),
        "root.sh",
        r#"{"deps":["./missing.sh"]}"#,
        "echo root-ran",
    );

    let (mut workspace, _events) = Workspace::new(options(vec![root.clone()], false));
    timeout(Duration::from_secs(10), workspace.run())
        .await
        .expect("workspace should settle")
        .expect("run should not error");

    assert_eq!(workspace.workspace_status(), WorkspaceStatus::Fail);

    let missing_path = canonical_config_path(&root)
        .parent()
        .expect("parent")
        .join("missing.sh");
    let missing_project = workspace.project(&missing_path).expect("missing project");
    assert!(missing_project.config_error().is_some());
    assert!(
        missing_project
            .output()
            .contains("configuration file not found"),
        "output: {}",
        missing_project.output()
    );

    // The dependant never ran.
    let root_project = workspace
        .project(&canonical_config_path(&root))
        .expect("root project");
    assert!(!root_project.output().contains("root-ran"));
}

#[tokio::test]
async fn sentinel_marks_a_long_running_task_ready() {
    init_tracing();
    let dir = tempfile::tempdir().expect("tempdir");

    let task = write_task_script(
        dir.path(),
        "server.sh",
        r#"{"name":"server"}"#,
        "echo listening\necho task-done\nsleep 0.5\nexit 7",
    );

    let (mut workspace, _events) = Workspace::new(options(vec![task.clone()], true));
    tokio::select! {
        _ = workspace.run() => panic!("watch-mode workspace should not exit on its own"),
        _ = sleep(Duration::from_secs(3)) => {}
    }

    // The sentinel completed the task; the later non-zero exit only got
    // logged.
    assert_eq!(workspace.workspace_status(), WorkspaceStatus::Ok);
    let project = workspace
        .project(&canonical_config_path(&task))
        .expect("project");
    assert!(project.output().contains("listening"));
    assert!(
        project.output().contains("process exited with code=7"),
        "output: {}",
        project.output()
    );
    assert!(!project.output().contains("task-done"));
    assert_eq!(project.exit_code(), Some(7));
}

#[tokio::test]
async fn schedule_update_reruns_a_settled_task() {
    init_tracing();
    let dir = tempfile::tempdir().expect("tempdir");
    let log = dir.path().join("run.log");

    let task = write_task_script(
        dir.path(),
        "task.sh",
        r#"{"name":"task"}"#,
        "echo ran >> run.log",
    );
    let task_id = canonical_config_path(&task);

    let (mut workspace, _events) = Workspace::new(options(vec![task], true));
    let controller = workspace.controller();

    let task_for_update = task_id.clone();
    tokio::select! {
        _ = workspace.run() => panic!("watch-mode workspace should not exit on its own"),
        _ = async move {
            sleep(Duration::from_millis(1500)).await;
            controller.schedule_update(task_for_update);
            sleep(Duration::from_millis(1500)).await;
        } => {}
    }

    let log_contents = fs::read_to_string(&log).expect("run log");
    assert_eq!(log_contents, "ran\nran\n");
    assert_eq!(workspace.workspace_status(), WorkspaceStatus::Ok);
}

#[tokio::test]
async fn watched_input_change_triggers_a_rerun() {
    init_tracing();
    let dir = tempfile::tempdir().expect("tempdir");
    let inputs = dir.path().join("inputs");
    fs::create_dir(&inputs).expect("inputs dir");
    let log = dir.path().join("run.log");

    let task = write_task_script(
        dir.path(),
        "task.sh",
        r#"{"name":"task","watch":["inputs"]}"#,
        "echo ran >> run.log",
    );

    let (mut workspace, _events) = Workspace::new(options(vec![task], true));
    tokio::select! {
        _ = workspace.run() => panic!("watch-mode workspace should not exit on its own"),
        _ = async {
            sleep(Duration::from_millis(1500)).await;
            fs::write(inputs.join("data.txt"), "changed").expect("touch input");
            sleep(Duration::from_secs(2)).await;
        } => {}
    }

    // Filesystem events may arrive in more than one debounce window, so the
    // task may legitimately run more than twice.
    let log_contents = fs::read_to_string(&log).expect("run log");
    assert!(
        log_contents.matches("ran").count() >= 2,
        "expected a re-run, got: {log_contents:?}"
    );
}

#[tokio::test]
async fn stop_disposes_every_project() {
    init_tracing();
    let dir = tempfile::tempdir().expect("tempdir");

    let task = write_task_script(dir.path(), "task.sh", r#"{"name":"task"}"#, "exit 0");

    let (mut workspace, _events) = Workspace::new(options(vec![task], true));
    let controller = workspace.controller();

    let run_result = timeout(Duration::from_secs(10), async {
        tokio::spawn(async move {
            sleep(Duration::from_millis(1500)).await;
            controller.stop();
        });
        workspace.run().await
    })
    .await;
    run_result
        .expect("stop should end the loop")
        .expect("run should not error");

    assert!(workspace.bfs_projects().is_empty());
}

#[tokio::test]
async fn dependency_cycle_puts_the_workspace_in_error() {
    init_tracing();
    let dir = tempfile::tempdir().expect("tempdir");

    // a and b declare each other.
    let a = write_task_script(
        dir.path(),
        "a.sh",
        r#"{"deps":["./b.sh"]}"#,
        "echo a-ran",
    );
    let _b = write_task_script(
        dir.path(),
        "b.sh",
        r#"{"deps":["./a.sh"]}"#,
        "echo b-ran",
    );

    let (mut workspace, _events) = Workspace::new(options(vec![a.clone()], false));
    timeout(Duration::from_secs(10), workspace.run())
        .await
        .expect("workspace should settle")
        .expect("run should not error");

    assert_eq!(workspace.workspace_status(), WorkspaceStatus::Error);
    let error = workspace.workspace_error().expect("error");
    assert!(error.contains("dependency cycle detected"), "{error}");
    assert!(error.contains("a.sh"), "{error}");

    // No task ran, but the projects are still visible.
    let project = workspace
        .project(&canonical_config_path(&a))
        .expect("project");
    assert!(!project.output().contains("a-ran"));
    assert_eq!(workspace.bfs_projects().len(), 2);
}
