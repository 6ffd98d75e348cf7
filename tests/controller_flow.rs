//! End-to-end controller scenarios against the scripted effect runner
//!
//! Time is paused, so poll cadence runs deterministically: the runtime
//! auto-advances the clock whenever all tasks are idle.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use protokol_client::{
    ClientConfig, Controller, Output, StubEffectRunner, TaskStatus,
};

fn pending() -> Result<TaskStatus, String> {
    Ok(TaskStatus {
        task_status: "processing".to_string(),
        status: "Pending".to_string(),
        ..TaskStatus::default()
    })
}

fn finished() -> Result<TaskStatus, String> {
    Ok(TaskStatus {
        task_status: "finished".to_string(),
        status: "Done".to_string(),
        full_protocol: Some("/f.pdf".to_string()),
        short_protocol: Some("/s.pdf".to_string()),
        ..TaskStatus::default()
    })
}

fn server_error(message: &str) -> Result<TaskStatus, String> {
    Ok(TaskStatus {
        task_status: "processing".to_string(),
        status: "Error".to_string(),
        error: Some(message.to_string()),
        ..TaskStatus::default()
    })
}

fn transport_error() -> Result<TaskStatus, String> {
    Err("connection reset".to_string())
}

fn controller_with(stub: Arc<StubEffectRunner>) -> Controller {
    Controller::with_runner(&ClientConfig::default(), stub)
}

/// Wait until the output satisfies the predicate, or fail after (paused)
/// time runs out.
async fn wait_for(controller: &Controller, what: &str, pred: impl Fn(&Output) -> bool) -> Output {
    let mut rx = controller.watch_output();
    let result = tokio::time::timeout(Duration::from_secs(60), async {
        loop {
            {
                let output = rx.borrow_and_update().clone();
                if pred(&output) {
                    return output;
                }
            }
            if rx.changed().await.is_err() {
                panic!("state loop exited while waiting for: {}", what);
            }
        }
    })
    .await;
    result.unwrap_or_else(|_| panic!("timed out waiting for: {}", what))
}

/// Let any remaining scheduled work run to quiescence.
async fn settle() {
    tokio::time::sleep(Duration::from_secs(10)).await;
}

#[tokio::test(start_paused = true)]
async fn upload_finishes_after_two_ticks() {
    let stub = StubEffectRunner::new(vec![pending(), finished()]);
    let controller = controller_with(stub.clone());

    controller
        .upload_file(PathBuf::from("/tmp/sample.wav"))
        .await
        .unwrap();

    let output = wait_for(&controller, "task to finish", |o| !o.full_protocol_url.is_empty()).await;
    assert_eq!(output.full_protocol_url, "/f.pdf");
    assert_eq!(output.short_protocol_url, "/s.pdf");
    assert!(!output.processing);
    assert!(output.error_text.is_empty());

    // Exactly two ticks: the immediate one and one a second later.
    settle().await;
    assert_eq!(stub.polls_served(), 2);

    controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn server_error_stops_polling_immediately() {
    let stub = StubEffectRunner::new(vec![pending(), server_error("decode failed")]);
    let controller = controller_with(stub.clone());

    controller
        .upload_file(PathBuf::from("/tmp/sample.wav"))
        .await
        .unwrap();

    let output = wait_for(&controller, "server error", |o| !o.error_text.is_empty()).await;
    assert_eq!(output.error_text, "decode failed");
    assert!(!output.processing);
    // task_status still read "processing"; the error branch won anyway.
    assert_eq!(output.status_text, "processing");

    settle().await;
    assert_eq!(stub.polls_served(), 2, "no further ticks after a terminal error");

    controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn upload_failure_reports_and_never_polls() {
    let stub = StubEffectRunner::failing_upload();
    let controller = controller_with(stub.clone());

    controller
        .upload_file(PathBuf::from("/tmp/sample.wav"))
        .await
        .unwrap();

    let output = wait_for(&controller, "upload error", |o| !o.error_text.is_empty()).await;
    assert_eq!(output.error_text, "connection refused");
    assert!(!output.processing);

    settle().await;
    assert_eq!(stub.polls_served(), 0);

    controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn two_transport_failures_recover_three_are_terminal() {
    // Two failures, then success: polling survives and completes.
    let stub = StubEffectRunner::new(vec![
        transport_error(),
        transport_error(),
        pending(),
        finished(),
    ]);
    let controller = controller_with(stub.clone());
    controller
        .upload_file(PathBuf::from("/tmp/sample.wav"))
        .await
        .unwrap();

    let output = wait_for(&controller, "recovery", |o| !o.full_protocol_url.is_empty()).await;
    assert!(output.error_text.is_empty());
    assert_eq!(stub.polls_served(), 4);
    controller.shutdown().await;

    // Three consecutive failures: terminal status-check error.
    let stub = StubEffectRunner::new(vec![
        transport_error(),
        transport_error(),
        transport_error(),
        finished(), // never reached
    ]);
    let controller = controller_with(stub.clone());
    controller
        .upload_file(PathBuf::from("/tmp/sample.wav"))
        .await
        .unwrap();

    let output = wait_for(&controller, "retry exhaustion", |o| !o.error_text.is_empty()).await;
    assert!(output.error_text.contains("status"));
    assert!(!output.processing);
    assert!(output.full_protocol_url.is_empty());

    settle().await;
    assert_eq!(stub.polls_served(), 3);

    controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn capture_failure_surfaces_and_never_polls() {
    let stub = StubEffectRunner::failing_open();
    let controller = controller_with(stub.clone());

    controller.start_recording().await.unwrap();

    let output = wait_for(&controller, "capture error", |o| !o.error_text.is_empty()).await;
    assert_eq!(output.error_text, "No audio input device found");
    assert!(!output.recording);
    assert!(!output.processing);

    settle().await;
    assert_eq!(stub.polls_served(), 0);

    controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn recording_finishes_when_task_completes() {
    let stub = StubEffectRunner::new(vec![pending(), pending(), finished()]);
    let controller = controller_with(stub.clone());

    controller.start_recording().await.unwrap();

    let output = wait_for(&controller, "recording active", |o| o.recording).await;
    assert!(output.processing);

    let output = wait_for(&controller, "task to finish", |o| !o.full_protocol_url.is_empty()).await;
    // Finishing the task also ends the live session.
    assert!(!output.recording);
    assert!(!output.processing);

    controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn server_initiated_close_stops_recording_without_user_action() {
    let stub = StubEffectRunner::dropping_connection(vec![
        pending(),
        pending(),
        pending(),
        pending(),
        finished(),
    ]);
    let controller = controller_with(stub.clone());

    controller.start_recording().await.unwrap();
    wait_for(&controller, "recording active", |o| o.recording).await;

    // The stub drops the connection 500 ms after opening it.
    let output = wait_for(&controller, "recording to stop", |o| !o.recording).await;
    assert!(output.error_text.is_empty(), "clean close is not an error");

    // The task itself keeps processing and can still finish.
    let output = wait_for(&controller, "task to finish", |o| !o.full_protocol_url.is_empty()).await;
    assert_eq!(output.full_protocol_url, "/f.pdf");

    controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn stop_recording_twice_is_harmless() {
    let stub = StubEffectRunner::new(vec![pending(), pending(), pending(), pending()]);
    let controller = controller_with(stub.clone());

    controller.start_recording().await.unwrap();
    wait_for(&controller, "recording active", |o| o.recording).await;

    controller.stop_recording().await.unwrap();
    controller.stop_recording().await.unwrap();

    let output = wait_for(&controller, "recording to stop", |o| !o.recording).await;
    assert!(output.error_text.is_empty());

    // Stopping again after the session is fully closed is still a no-op.
    controller.stop_recording().await.unwrap();
    settle().await;
    assert!(!controller.output().recording);

    controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn retry_count_resets_between_tasks() {
    // First task burns two retries, second task starts clean and survives
    // two more failures of its own.
    let stub = StubEffectRunner::new(vec![
        transport_error(),
        transport_error(),
        finished(),
        transport_error(),
        transport_error(),
        finished(),
    ]);
    let controller = controller_with(stub.clone());

    controller
        .upload_file(PathBuf::from("/tmp/a.wav"))
        .await
        .unwrap();
    let output = wait_for(&controller, "first task", |o| !o.full_protocol_url.is_empty()).await;
    assert!(output.error_text.is_empty());

    controller
        .upload_file(PathBuf::from("/tmp/b.wav"))
        .await
        .unwrap();
    let output = wait_for(&controller, "second task", |o| !o.processing && stub.polls_served() == 6).await;
    assert!(output.error_text.is_empty());

    controller.shutdown().await;
}
