use std::time::Duration;

use tokio::time::sleep;

use crate::error::ApiError;
use crate::schedule::types::*;
use crate::schedule::{SchedulingPolicy, TaskScheduler};
use crate::storage::task::{JsonFileTaskStorage, TaskStorage};
use crate::test_support::{scheduler_config, ScriptedEngine, TestHarness};

// 轮询直到任务结束
async fn wait_for_terminal(scheduler: &TaskScheduler, task_id: &str) -> TaskRecord {
    for _ in 0..500 {
        if let Some(record) = scheduler.task_manager().get(task_id) {
            if record.status.is_terminal() {
                return record;
            }
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("task {} never finished", task_id);
}

async fn wait_for_progress(scheduler: &TaskScheduler, task_id: &str, at_least: u8) {
    for _ in 0..500 {
        if scheduler
            .task_manager()
            .get(task_id)
            .is_some_and(|record| record.progress >= at_least)
        {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("task {} never reached {}%", task_id, at_least);
}

fn params(language: &str) -> TranscribeParams {
    TranscribeParams {
        language: LanguageHint::parse(Some(language)),
        word_timestamps: false,
    }
}

fn long_audio() -> crate::schedule::Decision {
    SchedulingPolicy::default().decide(30 * 1024 * 1024, Some(1200.0))
}

#[tokio::test]
async fn test_async_task_reports_increasing_progress_until_completed() {
    let (engine, gate) = ScriptedEngine::evenly_spaced("en", 1200.0, 10).gated();
    let harness = TestHarness::new(engine, scheduler_config(2, 4));
    let scheduler = harness.scheduler.clone();

    let record = scheduler
        .submit(harness.upload(b"RIFF"), "lecture.mp3".into(), params("auto"), &long_audio())
        .await
        .unwrap();
    assert_eq!(record.status, TaskStatus::Processing);
    assert_eq!(record.progress, 1);
    assert_eq!(record.estimated_minutes, Some(20.0));

    let releaser = std::thread::spawn(move || {
        for _ in 0..10 {
            std::thread::sleep(Duration::from_millis(20));
            if gate.send(()).is_err() {
                break;
            }
        }
    });

    let mut observed = Vec::new();
    let finished = loop {
        let current = scheduler.task_manager().get(&record.id).unwrap();
        observed.push(current.progress);
        if current.status.is_terminal() {
            break current;
        }
        sleep(Duration::from_millis(5)).await;
    };
    releaser.join().unwrap();

    assert!(observed.windows(2).all(|w| w[0] <= w[1]), "{:?}", observed);
    assert!(observed.iter().any(|p| (30..100).contains(p)), "{:?}", observed);
    assert_eq!(finished.status, TaskStatus::Completed);
    assert_eq!(finished.progress, 100);
    assert_eq!(finished.progress_text, "Completed successfully");
    assert_eq!(finished.segments_processed, 10);
    assert_eq!(finished.detected_language.as_deref(), Some("en"));
    let result = finished.result.unwrap();
    assert_eq!(result.segment_count, 10);
    assert!(!result.text.is_empty());
}

#[tokio::test]
async fn test_upload_is_removed_after_completion() {
    let harness = TestHarness::new(
        ScriptedEngine::evenly_spaced("en", 900.0, 3),
        scheduler_config(1, 1),
    );
    let upload = harness.upload(b"RIFF");
    let path = upload.path().to_path_buf();

    let record = harness
        .scheduler
        .submit(upload, "a.wav".into(), params("en"), &long_audio())
        .await
        .unwrap();
    wait_for_terminal(&harness.scheduler, &record.id).await;

    assert!(!path.exists());
}

#[tokio::test]
async fn test_creation_and_terminal_state_are_persisted() {
    let harness = TestHarness::new(
        ScriptedEngine::failing("decoder exploded"),
        scheduler_config(1, 1),
    );
    let upload = harness.upload(b"RIFF");
    let path = upload.path().to_path_buf();

    let record = harness
        .scheduler
        .submit(upload, "broken.wav".into(), params("en"), &long_audio())
        .await
        .unwrap();
    let failed = wait_for_terminal(&harness.scheduler, &record.id).await;

    assert_eq!(failed.status, TaskStatus::Error);
    assert_eq!(failed.error.as_deref(), Some("decoder exploded"));
    assert_eq!(failed.progress_text, "Error: decoder exploded");
    assert!(failed.result.is_none());
    assert!(!path.exists());

    // 终态写入后立即强制快照
    sleep(Duration::from_millis(50)).await;
    let stored = JsonFileTaskStorage::new(&harness.status_file)
        .load()
        .unwrap()
        .unwrap();
    assert_eq!(stored[&record.id].status, TaskStatus::Error);
}

#[tokio::test]
async fn test_panicking_engine_ends_in_error() {
    let harness = TestHarness::new(ScriptedEngine::panicking("boom"), scheduler_config(1, 1));

    let record = harness
        .scheduler
        .submit(harness.upload(b"RIFF"), "a.wav".into(), params("en"), &long_audio())
        .await
        .unwrap();
    let failed = wait_for_terminal(&harness.scheduler, &record.id).await;

    assert_eq!(failed.status, TaskStatus::Error);
    assert_eq!(failed.error.as_deref(), Some("Transcription panicked: boom"));
}

#[tokio::test]
async fn test_cancel_stops_running_task() {
    let (engine, gate) = ScriptedEngine::evenly_spaced("en", 1200.0, 5).gated();
    let harness = TestHarness::new(engine, scheduler_config(1, 1));
    let scheduler = harness.scheduler.clone();

    let record = scheduler
        .submit(harness.upload(b"RIFF"), "a.wav".into(), params("en"), &long_audio())
        .await
        .unwrap();
    wait_for_progress(&scheduler, &record.id, 30).await;

    let accepted = scheduler.cancel(&record.id).await.unwrap();
    assert_eq!(accepted.status, TaskStatus::Processing);
    drop(gate);

    let cancelled = wait_for_terminal(&scheduler, &record.id).await;
    assert_eq!(cancelled.status, TaskStatus::Error);
    assert_eq!(cancelled.error.as_deref(), Some("Task cancelled"));
    assert!(cancelled.result.is_none());
}

#[tokio::test]
async fn test_cancel_unknown_and_finished_tasks() {
    let harness = TestHarness::new(
        ScriptedEngine::evenly_spaced("en", 900.0, 1),
        scheduler_config(1, 1),
    );
    let scheduler = harness.scheduler.clone();

    assert!(matches!(
        scheduler.cancel("missing").await,
        Err(ApiError::TaskNotFound(_))
    ));

    let record = scheduler
        .submit(harness.upload(b"RIFF"), "a.wav".into(), params("en"), &long_audio())
        .await
        .unwrap();
    wait_for_terminal(&scheduler, &record.id).await;

    assert!(matches!(
        scheduler.cancel(&record.id).await,
        Err(ApiError::TaskFinished {
            status: TaskStatus::Completed,
            ..
        })
    ));
}

#[tokio::test]
async fn test_cancel_restored_task_without_worker() {
    let harness = TestHarness::new(ScriptedEngine::evenly_spaced("en", 1.0, 1), scheduler_config(1, 1));
    let orphan = TaskRecord::new("restored".into(), "old.wav".into(), &LanguageHint::Auto);
    harness.scheduler.task_manager().create(orphan).unwrap();

    let cancelled = harness.scheduler.cancel("restored").await.unwrap();

    assert_eq!(cancelled.status, TaskStatus::Error);
    assert_eq!(cancelled.error.as_deref(), Some("Task cancelled"));
}

#[tokio::test]
async fn test_submissions_beyond_queue_bound_are_rejected() {
    let (engine, gate) = ScriptedEngine::evenly_spaced("en", 1200.0, 2).gated();
    let harness = TestHarness::new(engine, scheduler_config(1, 0));
    let scheduler = harness.scheduler.clone();

    let first = scheduler
        .submit(harness.upload(b"RIFF"), "a.wav".into(), params("en"), &long_audio())
        .await
        .unwrap();
    let rejected = scheduler
        .submit(harness.upload(b"RIFF"), "b.wav".into(), params("en"), &long_audio())
        .await;

    assert!(matches!(rejected, Err(ApiError::Overloaded { active: 1 })));
    assert_eq!(scheduler.task_manager().len(), 1);

    drop(gate);
    wait_for_terminal(&scheduler, &first.id).await;
}

#[tokio::test]
async fn test_tasks_beyond_concurrency_bound_wait_in_queue() {
    let (engine, gate) = ScriptedEngine::evenly_spaced("en", 1200.0, 2).gated();
    let harness = TestHarness::new(engine, scheduler_config(1, 1));
    let scheduler = harness.scheduler.clone();

    let first = scheduler
        .submit(harness.upload(b"RIFF"), "a.wav".into(), params("en"), &long_audio())
        .await
        .unwrap();
    wait_for_progress(&scheduler, &first.id, 30).await;
    let second = scheduler
        .submit(harness.upload(b"RIFF"), "b.wav".into(), params("en"), &long_audio())
        .await
        .unwrap();

    let mut queued = None;
    for _ in 0..100 {
        let record = scheduler.task_manager().get(&second.id).unwrap();
        if record.progress_text == "Queued..." {
            queued = Some(record);
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(queued.map(|r| r.progress), Some(1));

    drop(gate);
    assert_eq!(
        wait_for_terminal(&scheduler, &first.id).await.status,
        TaskStatus::Completed
    );
    assert_eq!(
        wait_for_terminal(&scheduler, &second.id).await.status,
        TaskStatus::Completed
    );
}

#[tokio::test]
async fn test_task_timeout_fails_task() {
    let (engine, gate) = ScriptedEngine::evenly_spaced("en", 1200.0, 50).gated();
    std::thread::spawn(move || {
        for _ in 0..50 {
            std::thread::sleep(Duration::from_millis(20));
            if gate.send(()).is_err() {
                break;
            }
        }
    });
    let mut config = scheduler_config(1, 1);
    config.task_timeout = Some(Duration::from_millis(100));
    let harness = TestHarness::new(engine, config);

    let record = harness
        .scheduler
        .submit(harness.upload(b"RIFF"), "a.wav".into(), params("en"), &long_audio())
        .await
        .unwrap();
    let failed = wait_for_terminal(&harness.scheduler, &record.id).await;

    assert_eq!(failed.status, TaskStatus::Error);
    assert!(failed.error.unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_sync_run_returns_result_and_removes_upload() {
    let harness = TestHarness::new(
        ScriptedEngine::new(
            "en",
            2.0,
            vec![crate::test_support::segment(0.0, 2.0, " hello world ")],
        ),
        scheduler_config(1, 1),
    );
    let upload = harness.upload(b"RIFF");
    let path = upload.path().to_path_buf();

    let result = harness.scheduler.run_sync(upload, params("auto")).await.unwrap();

    assert_eq!(result.text, "hello world");
    assert_eq!(result.language, "en");
    assert_eq!(result.segment_count, 1);
    assert!(!path.exists());
    assert!(harness.scheduler.task_manager().is_empty());
}
