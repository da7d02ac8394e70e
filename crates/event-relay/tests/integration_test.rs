// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

const EXIT_TIMEOUT: Duration = Duration::from_secs(5);

fn relay_command() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_event-relay"));
    command
        .env_remove("EVENT_BATCH_WINDOW_MS")
        .env_remove("EVENT_MAX_BATCH_SIZE")
        .env_remove("EVENT_OVERFLOW_CAPACITY")
        .env_remove("EVENT_SNAPSHOT_TYPES")
        .env_remove("EVENT_SNAPSHOT_MARKER")
        .env_remove("EVENT_SINK_QUEUE_SIZE")
        .env_remove("EVENT_LOG_LEVEL")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    command
}

fn wait_with_timeout(child: &mut Child, limit: Duration) -> Option<ExitStatus> {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if let Some(status) = child.try_wait().expect("failed to poll relay") {
            return Some(status);
        }
        thread::sleep(Duration::from_millis(20));
    }
    None
}

/// Forwards stdout lines to a channel so reads can time out.
fn stdout_lines(stdout: ChildStdout) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in BufReader::new(stdout).lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

#[test]
fn relays_stdin_batches_to_stdout() {
    // only the final drain flushes, so the snapshots always meet in one batch
    let mut child = relay_command()
        .env("EVENT_BATCH_WINDOW_MS", "60000")
        .spawn()
        .expect("failed to start relay");

    let mut stdin = child.stdin.take().expect("stdin not piped");
    stdin
        .write_all(
            concat!(
                r#"{"type":"GAME_STATE","payload":{"frame":1,"chips":10}}"#,
                "\n",
                r#"{"type":"GAME_STATE","payload":{"frame":1,"chips":20}}"#,
                "\n",
                "not json\n",
                r#"{"type":"CARD_SCORED"}"#,
                "\n",
            )
            .as_bytes(),
        )
        .expect("failed to write events");
    drop(stdin);

    let output = child.wait_with_output().expect("relay did not finish");
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).expect("stdout is not utf-8");
    let events: Vec<serde_json::Value> = stdout
        .lines()
        .map(|line| serde_json::from_str(line).expect("stdout line is not json"))
        .flat_map(|value: serde_json::Value| match value {
            serde_json::Value::Array(events) => events,
            event => vec![event],
        })
        .collect();

    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["payload"]["chips"], 20);
    assert_eq!(events[1]["type"], "CARD_SCORED");

    let stderr = String::from_utf8(output.stderr).expect("stderr is not utf-8");
    assert!(stderr.contains("Skipping malformed event"));
}

#[cfg(unix)]
#[test]
fn interrupt_exits_while_stdin_is_open() {
    let mut child = relay_command().spawn().expect("failed to start relay");
    let lines = stdout_lines(child.stdout.take().expect("stdout not piped"));

    // kept open for the whole test, like an interactive terminal
    let mut stdin = child.stdin.take().expect("stdin not piped");
    stdin
        .write_all(b"{\"type\":\"URGENT\",\"priority\":\"high\"}\n")
        .expect("failed to write event");
    stdin.flush().expect("failed to flush stdin");

    // the priority flush proves the relay is inside its main loop with the signal handler armed
    let line = lines.recv_timeout(EXIT_TIMEOUT).expect("no output from relay");
    let event: serde_json::Value = serde_json::from_str(&line).expect("output is not json");
    assert_eq!(event["type"], "URGENT");

    let killed = Command::new("kill")
        .args(["-INT", &child.id().to_string()])
        .status()
        .expect("failed to run kill");
    assert!(killed.success());

    let status = wait_with_timeout(&mut child, EXIT_TIMEOUT);
    if status.is_none() {
        let _ = child.kill();
    }
    let status = status.expect("relay still running after interrupt");
    assert!(status.success());
    drop(stdin);
}

#[test]
fn invalid_log_level_still_reports_config_error() {
    let mut child = relay_command()
        .env("EVENT_LOG_LEVEL", "loud")
        .spawn()
        .expect("failed to start relay");

    let status = wait_with_timeout(&mut child, EXIT_TIMEOUT);
    if status.is_none() {
        let _ = child.kill();
    }
    assert!(status.is_some(), "relay did not exit on invalid config");

    let mut stderr = String::new();
    child
        .stderr
        .take()
        .expect("stderr not piped")
        .read_to_string(&mut stderr)
        .expect("failed to read stderr");
    assert!(stderr.contains("Error creating config"));
    assert!(stderr.contains("Invalid log level 'loud'"));
}
