//! End-to-end task runs against fake container and agent runtimes.

mod common;

use std::fs;
use std::sync::Arc;

use setupbench::execution::ExecOutput;
use setupbench::orchestrator::{HostDriven, InEnvironment, TaskRunner, TaskStatus};
use setupbench::recorder::{read_tool_log, ToolPhase};
use setupbench::agent::SessionOutcome;
use setupbench::recorder::Stats;
use tempfile::TempDir;

use common::{bash_session, test_config, write_task, FakeRuntime, ScriptedAgent};

const IMAGE: &str = "ubuntu:22.04";

fn host_runner(
    temp: &TempDir,
    runtime: &Arc<FakeRuntime>,
    agent: ScriptedAgent,
) -> TaskRunner {
    TaskRunner::new(
        test_config(temp.path()),
        runtime.clone(),
        Box::new(HostDriven::new(agent.into_driver())),
    )
}

#[tokio::test]
async fn database_task_passes_on_success_marker() {
    let temp = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new().with_image(IMAGE));
    let agent = ScriptedAgent::events(bash_session("service postgresql start", 1500));
    let runner = host_runner(&temp, &runtime, agent);

    let task = write_task(
        temp.path(),
        "db-001",
        "database_setup",
        IMAGE,
        "echo 'Setup successful'",
    );
    let result = runner.run_task(&task).await;

    assert!(result.success);
    assert_eq!(result.status, TaskStatus::Passed);
    assert_eq!(result.total_tokens, 1500);
    assert_eq!(result.total_steps, 1);
    assert_eq!(result.bash_calls, 1);
    assert_eq!(result.errors, 0);
    assert_eq!(result.messages, 3);
    assert!(result.validation_output.contains("Setup successful"));
    assert!(!result.environment_leaked);

    // Environment released exactly once and nothing left behind.
    assert_eq!(runtime.count_calls("create setupbench-db-001"), 1);
    assert_eq!(runtime.count_calls("stop fake-1"), 1);
    assert_eq!(runtime.count_calls("remove fake-1"), 1);
    assert!(runtime.container_names().is_empty());

    // Record on disk.
    let saved = temp.path().join("out/results/db-001.json");
    let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(saved).unwrap()).unwrap();
    assert_eq!(value["status"], "passed");

    let entries = read_tool_log(&result.logs.tools_log).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].phase, ToolPhase::Pre);
    assert_eq!(entries[1].phase, ToolPhase::Post);
    assert_eq!(entries[0].correlation_id, entries[1].correlation_id);

    let agent_log = fs::read_to_string(&result.logs.agent_log).unwrap();
    assert!(agent_log.contains("Starting task: db-001"));
    assert!(agent_log.contains("Result: PASS"));
}

#[tokio::test]
async fn dependency_task_fails_on_nonzero_exit_despite_marker() {
    let temp = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new().with_image(IMAGE));
    let runner = host_runner(&temp, &runtime, ScriptedAgent::events(bash_session("pip install -r requirements.txt", 10)));

    let task = write_task(
        temp.path(),
        "dep-001",
        "dependency_resolution",
        IMAGE,
        "echo 'Setup successful'; exit 1",
    );
    let result = runner.run_task(&task).await;

    assert!(!result.success);
    assert_eq!(result.status, TaskStatus::Failed);
    assert_eq!(result.total_tokens, 10);
    assert_eq!(runtime.count_calls("remove fake-1"), 1);
}

#[tokio::test]
async fn agent_crash_yields_error_result_and_releases() {
    let temp = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new().with_image(IMAGE));
    let mut events = bash_session("apt-get update", 999);
    events.truncate(3);
    let agent = ScriptedAgent::failing_mid_stream(events, "connection reset");
    let runner = host_runner(&temp, &runtime, agent);

    let task = write_task(temp.path(), "bg-002", "background_service", IMAGE, "echo 'Setup successful'");
    let result = runner.run_task(&task).await;

    assert!(!result.success);
    assert_eq!(result.status, TaskStatus::Error);
    assert_eq!(result.total_tokens, 0);
    assert!(result.errors >= 1);
    assert_eq!(result.total_steps, 1);
    assert!(result.validation_output.starts_with("Agent crashed:"));
    assert!(result.validation_output.contains("connection reset"));
    assert_eq!(runtime.count_calls("stop fake-1"), 1);
    assert_eq!(runtime.count_calls("remove fake-1"), 1);
    // Validation never ran.
    assert_eq!(runtime.count_calls("exec fake-1"), 0);
}

/// Every `pre` entry in `tools.jsonl` has a `post` with the same id.
fn assert_tool_calls_closed(tools_log: &std::path::Path) {
    let entries = read_tool_log(tools_log).unwrap();
    for pre in entries.iter().filter(|e| e.phase == ToolPhase::Pre) {
        assert!(
            entries
                .iter()
                .any(|e| e.phase == ToolPhase::Post && e.correlation_id == pre.correlation_id),
            "no post entry for {:?}",
            pre.correlation_id
        );
    }
}

#[tokio::test]
async fn agent_crash_mid_tool_closes_the_open_call() {
    let temp = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new().with_image(IMAGE));
    let mut events = bash_session("apt-get install -y redis-server", 999);
    events.truncate(2);
    let agent = ScriptedAgent::failing_mid_stream(events, "connection reset");
    let runner = host_runner(&temp, &runtime, agent);

    let task = write_task(temp.path(), "bg-012", "background_service", IMAGE, "true");
    let result = runner.run_task(&task).await;

    assert_eq!(result.status, TaskStatus::Error);
    assert_eq!(result.total_steps, 1);
    // The aborted tool call plus the crash itself.
    assert_eq!(result.errors, 2);
    assert_tool_calls_closed(&result.logs.tools_log);

    let entries = read_tool_log(&result.logs.tools_log).unwrap();
    assert_eq!(entries.last().unwrap().error.as_deref(), Some("session aborted"));
}

#[tokio::test]
async fn agent_timeout_mid_tool_closes_the_open_call() {
    let temp = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new().with_image(IMAGE));
    let mut events = bash_session("sleep infinity", 5);
    events.truncate(2);
    let config = test_config(temp.path()).with_timeout(1);
    let runner = TaskRunner::new(
        config,
        runtime.clone(),
        Box::new(HostDriven::new(ScriptedAgent::hanging_after(events).into_driver())),
    );

    let task = write_task(temp.path(), "bg-013", "background_service", IMAGE, "true");
    let result = runner.run_task(&task).await;

    assert_eq!(result.validation_output, "Agent timed out after 1s");
    assert_eq!(result.total_steps, 1);
    assert_tool_calls_closed(&result.logs.tools_log);
    assert_eq!(runtime.count_calls("remove fake-1"), 1);
}

#[tokio::test]
async fn agent_launch_failure_is_a_crash() {
    let temp = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new().with_image(IMAGE));
    let runner = host_runner(&temp, &runtime, ScriptedAgent::failing_on_open("claude: not found"));

    let task = write_task(temp.path(), "repo-003", "repo_setup", IMAGE, "true");
    let result = runner.run_task(&task).await;

    assert_eq!(result.status, TaskStatus::Error);
    assert_eq!(result.errors, 1);
    assert!(result.validation_output.contains("claude: not found"));
    assert!(runtime.container_names().is_empty());
}

#[tokio::test]
async fn validation_timeout_is_a_failure() {
    let temp = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new().with_image(IMAGE));
    let config = test_config(temp.path()).with_validation_timeout(1);
    let runner = TaskRunner::new(
        config,
        runtime.clone(),
        Box::new(HostDriven::new(
            ScriptedAgent::events(bash_session("true", 5)).into_driver(),
        )),
    );

    let task = write_task(
        temp.path(),
        "db-004",
        "database_setup",
        IMAGE,
        "sleep 5; echo 'Setup successful'",
    );
    let result = runner.run_task(&task).await;

    assert!(!result.success);
    assert_eq!(result.status, TaskStatus::Failed);
    assert_eq!(result.validation_output, "Validation command timed out after 1s");
    assert_eq!(runtime.count_calls("remove fake-1"), 1);
}

#[tokio::test]
async fn agent_timeout_is_an_error() {
    let temp = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new().with_image(IMAGE));
    let config = test_config(temp.path()).with_timeout(1);
    let runner = TaskRunner::new(
        config,
        runtime.clone(),
        Box::new(HostDriven::new(ScriptedAgent::hanging().into_driver())),
    );

    let task = write_task(temp.path(), "bg-005", "background_service", IMAGE, "true");
    let result = runner.run_task(&task).await;

    assert_eq!(result.status, TaskStatus::Error);
    assert_eq!(result.validation_output, "Agent timed out after 1s");
    assert_eq!(result.total_tokens, 0);
    assert_eq!(runtime.count_calls("remove fake-1"), 1);
}

#[tokio::test]
async fn batch_sweeps_leftovers_from_previous_batch() {
    let temp = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new().with_image(IMAGE));
    let dataset = temp.path().join("tasks");
    fs::create_dir_all(&dataset).unwrap();
    write_task(&dataset, "db-001", "database_setup", IMAGE, "echo 'Setup successful'");

    // First batch: teardown fails and the container leaks.
    runtime.set_fail_remove(true);
    let first = host_runner(&temp, &runtime, ScriptedAgent::events(bash_session("true", 1)));
    let summary = first.run_dataset(&dataset, None).await.unwrap();
    assert_eq!(summary.total_tasks, 1);
    assert_eq!(summary.leaked_environments, 1);
    assert!(summary.results[0].success);
    assert!(summary.results[0].environment_leaked);
    assert_eq!(runtime.container_names(), vec!["setupbench-db-001"]);

    // Second batch sweeps before provisioning anything.
    runtime.set_fail_remove(false);
    let before = runtime.calls().len();
    let second = host_runner(&temp, &runtime, ScriptedAgent::events(bash_session("true", 1)));
    let summary = second.run_dataset(&dataset, None).await.unwrap();
    assert_eq!(summary.successful_tasks, 1);
    assert_eq!(summary.leaked_environments, 0);

    let calls = &runtime.calls()[before..];
    let sweep_remove = calls.iter().position(|c| c == "remove fake-1").unwrap();
    let create = calls.iter().position(|c| c.starts_with("create ")).unwrap();
    assert_eq!(calls[0], "list setupbench-");
    assert!(sweep_remove < create);
    assert!(runtime.container_names().is_empty());

    let summary_file = temp.path().join("out/summary.json");
    let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(summary_file).unwrap()).unwrap();
    assert_eq!(value["total_tasks"], 1);
}

#[tokio::test]
async fn batch_produces_one_result_per_task() {
    let temp = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new().with_image(IMAGE));
    let dataset = temp.path().join("tasks");
    fs::create_dir_all(&dataset).unwrap();
    write_task(&dataset, "a-pass", "database_setup", IMAGE, "echo 'Setup successful'");
    write_task(&dataset, "b-fail", "dependency_resolution", IMAGE, "exit 3");
    fs::write(dataset.join("c-broken.json"), "{ not json").unwrap();

    let runner = host_runner(&temp, &runtime, ScriptedAgent::events(bash_session("true", 100)));
    let summary = runner.run_dataset(&dataset, None).await.unwrap();

    assert_eq!(summary.total_tasks, 3);
    assert_eq!(summary.successful_tasks, 1);
    assert_eq!(summary.failed_tasks, 2);
    assert_eq!(summary.errored_tasks, 1);
    assert!((summary.success_rate - 100.0 / 3.0).abs() < 1e-9);

    let ids: Vec<_> = summary.results.iter().map(|r| r.instance_id.as_str()).collect();
    assert_eq!(ids, vec!["a-pass", "b-fail", "c-broken"]);
    assert!(temp.path().join("out/results/c-broken.json").exists());
    assert_eq!(summary.results[2].status, TaskStatus::Error);

    // Every provisioned environment released once.
    assert_eq!(runtime.count_calls("remove fake-1"), 1);
    assert_eq!(runtime.count_calls("remove fake-2"), 1);

    let limited = runner.run_dataset(&dataset, Some(1)).await.unwrap();
    assert_eq!(limited.total_tasks, 1);
}

#[tokio::test]
async fn local_task_validates_in_host_shell() {
    let temp = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let agent = ScriptedAgent::events(bash_session("touch ready", 7)).with_action(|dir| {
        fs::write(dir.join("ready"), "yes").unwrap();
    });
    let runner = host_runner(&temp, &runtime, agent);

    let task = write_task(
        temp.path(),
        "local-001",
        "repo_setup",
        "local",
        "test -f ready && echo 'Setup successful'",
    );
    let result = runner.run_task(&task).await;

    assert!(result.success, "output: {}", result.validation_output);
    assert!(runtime.calls().is_empty());
}

#[tokio::test]
async fn fixtures_are_staged_into_workspace() {
    let temp = TempDir::new().unwrap();
    let fixture = temp.path().join("SetupBench/setupbench/fixtures/db-006");
    fs::create_dir_all(fixture.join("sql")).unwrap();
    fs::write(fixture.join("sql/schema.sql"), "CREATE TABLE t();").unwrap();

    let runtime = Arc::new(FakeRuntime::new().with_image(IMAGE));
    let runner = host_runner(&temp, &runtime, ScriptedAgent::events(bash_session("true", 1)));
    let task = write_task(
        temp.path(),
        "db-006",
        "database_setup",
        IMAGE,
        "test -f sql/schema.sql && echo 'Setup successful'",
    );
    let result = runner.run_task(&task).await;

    assert!(result.success, "output: {}", result.validation_output);
    assert!(temp.path().join("out/workspaces/db-006/sql/schema.sql").exists());
}

#[tokio::test]
async fn missing_image_is_a_provision_error() {
    let temp = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let runner = host_runner(&temp, &runtime, ScriptedAgent::events(bash_session("true", 1)));

    let task = write_task(temp.path(), "db-007", "database_setup", "nope:1", "true");
    let result = runner.run_task(&task).await;

    assert_eq!(result.status, TaskStatus::Error);
    assert!(result.validation_output.starts_with("Provision error:"));
    assert_eq!(runtime.count_calls("pull nope:1"), 1);
    assert!(runtime.container_names().is_empty());
}

#[tokio::test]
async fn start_failure_leaves_nothing_behind() {
    let temp = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new().with_image(IMAGE).failing_start());
    let runner = host_runner(&temp, &runtime, ScriptedAgent::events(bash_session("true", 1)));

    let task = write_task(temp.path(), "db-008", "database_setup", IMAGE, "true");
    let result = runner.run_task(&task).await;

    assert_eq!(result.status, TaskStatus::Error);
    assert!(runtime.container_names().is_empty());
}

#[tokio::test]
async fn in_environment_reads_back_session_report() {
    let temp = TempDir::new().unwrap();
    let harness_binary = temp.path().join("setupbench-bin");
    fs::write(&harness_binary, b"#!/bin/sh\n").unwrap();

    let runtime = Arc::new(FakeRuntime::new().with_image(IMAGE).with_exec_hook(|request, binds| {
        let command = request.cmd.last()?;
        if !command.starts_with("setupbench session") {
            return None;
        }
        assert!(request.env.iter().any(|v| v == "ANTHROPIC_API_KEY=sk-test"));
        let logs = binds
            .iter()
            .find(|(_, container)| container == "/setupbench/logs")
            .map(|(host, _)| host.clone())?;
        assert!(logs.join("env-009/task.json").exists());
        let outcome = SessionOutcome {
            total_tokens: 4242,
            num_turns: 3,
            stats: Stats {
                total_tool_calls: 5,
                bash_calls: 4,
                edit_calls: 1,
                messages: 6,
                ..Stats::default()
            },
            error: None,
        };
        fs::write(
            logs.join("env-009/session.json"),
            serde_json::to_string(&outcome).unwrap(),
        )
        .unwrap();
        Some(ExecOutput::default())
    }));

    let strategy = InEnvironment::new("sk-test", 100).with_harness_binary(&harness_binary);
    let runner = TaskRunner::new(test_config(temp.path()), runtime.clone(), Box::new(strategy));

    let task = write_task(temp.path(), "env-009", "database_setup", IMAGE, "echo 'Setup successful'");
    let result = runner.run_task(&task).await;

    assert!(result.success, "output: {}", result.validation_output);
    assert_eq!(result.total_tokens, 4242);
    assert_eq!(result.total_steps, 5);
    assert_eq!(result.edit_calls, 1);

    let built = runtime.built_images();
    assert_eq!(built.len(), 1);
    assert_eq!(built[0].0, "setupbench-agent:ubuntu-22.04");
    assert_eq!(built[0].1.get("BASE_IMAGE").map(String::as_str), Some(IMAGE));
    assert_eq!(runtime.count_calls("create setupbench-agent-env-009"), 1);
    assert!(runtime.container_names().is_empty());
}

#[tokio::test]
async fn in_environment_session_error_becomes_crash() {
    let temp = TempDir::new().unwrap();
    let harness_binary = temp.path().join("setupbench-bin");
    fs::write(&harness_binary, b"#!/bin/sh\n").unwrap();

    let runtime = Arc::new(FakeRuntime::new().with_image(IMAGE).with_exec_hook(|request, binds| {
        if !request.cmd.last()?.starts_with("setupbench session") {
            return None;
        }
        let (logs, _) = binds.iter().find(|(_, c)| c == "/setupbench/logs")?;
        let outcome = SessionOutcome {
            stats: Stats {
                total_tool_calls: 2,
                errors: 1,
                ..Stats::default()
            },
            error: Some("Agent stream failed: broken pipe".to_string()),
            ..SessionOutcome::default()
        };
        fs::write(
            logs.join("env-010/session.json"),
            serde_json::to_string(&outcome).unwrap(),
        )
        .unwrap();
        Some(ExecOutput::default())
    }));

    let strategy = InEnvironment::new("sk-test", 100).with_harness_binary(&harness_binary);
    let runner = TaskRunner::new(test_config(temp.path()), runtime.clone(), Box::new(strategy));

    let task = write_task(temp.path(), "env-010", "database_setup", IMAGE, "true");
    let result = runner.run_task(&task).await;

    assert_eq!(result.status, TaskStatus::Error);
    assert_eq!(result.errors, 2);
    assert_eq!(result.total_steps, 2);
    assert!(result.validation_output.contains("broken pipe"));
    assert!(runtime.container_names().is_empty());
}

#[tokio::test]
async fn in_environment_rejects_local_tasks() {
    let temp = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let strategy = InEnvironment::new("sk-test", 100);
    let runner = TaskRunner::new(test_config(temp.path()), runtime.clone(), Box::new(strategy));

    let task = write_task(temp.path(), "local-011", "repo_setup", "local", "true");
    let result = runner.run_task(&task).await;

    assert_eq!(result.status, TaskStatus::Error);
    assert!(result.validation_output.starts_with("Provision error:"));
    assert!(runtime.calls().is_empty());
}

#[tokio::test]
async fn path_like_instance_id_cannot_touch_other_results() {
    let temp = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new().with_image(IMAGE));
    let dataset = temp.path().join("tasks");
    fs::create_dir_all(&dataset).unwrap();
    write_task(&dataset, "a-db-001", "database_setup", IMAGE, "echo 'Setup successful'");
    let hostile = serde_json::json!({
        "instance_id": "..",
        "task_type": "database_setup",
        "base_image": IMAGE,
        "problem_statement": "Set up everything",
        "success_command": "true",
    });
    fs::write(dataset.join("b-parent.json"), hostile.to_string()).unwrap();

    let runner = host_runner(&temp, &runtime, ScriptedAgent::events(bash_session("true", 1)));
    let summary = runner.run_dataset(&dataset, None).await.unwrap();

    let ids: Vec<_> = summary.results.iter().map(|r| r.instance_id.as_str()).collect();
    assert_eq!(ids, vec!["a-db-001", "b-parent"]);
    assert!(summary.results[0].success);
    assert_eq!(summary.results[1].status, TaskStatus::Error);
    assert!(summary.results[1].validation_output.contains("instance_id"));

    // Earlier output is intact and the rejected task never provisioned.
    let out = temp.path().join("out");
    assert!(out.join("results/a-db-001.json").exists());
    assert!(out.join("results/b-parent.json").exists());
    assert!(out.join("logs/a-db-001/agent.log").exists());
    assert!(out.join("workspaces/a-db-001").is_dir());
    assert_eq!(
        runtime.calls().iter().filter(|c| c.starts_with("create ")).count(),
        1
    );
}

#[tokio::test]
async fn single_task_run_writes_summary_without_sweeping() {
    let temp = TempDir::new().unwrap();
    let runtime = Arc::new(FakeRuntime::new().with_image(IMAGE));
    let runner = host_runner(&temp, &runtime, ScriptedAgent::events(bash_session("true", 42)));

    let task = write_task(temp.path(), "db-014", "database_setup", IMAGE, "echo 'Setup successful'");
    let summary = runner.run_single(&task).await.unwrap();

    assert_eq!(summary.total_tasks, 1);
    assert_eq!(summary.successful_tasks, 1);
    assert_eq!(summary.results[0].instance_id, "db-014");

    let summary_file = temp.path().join("out/summary.json");
    let value: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(summary_file).unwrap()).unwrap();
    assert_eq!(value["total_tasks"], 1);
    assert_eq!(value["results"][0]["instance_id"], "db-014");
    assert!(temp.path().join("out/results/db-014.json").exists());
    assert!(!runtime.calls().iter().any(|c| c.starts_with("list ")));
}
