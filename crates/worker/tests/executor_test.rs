use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use scheduler_core::{
    RetryPolicy, SchedulerError, Task, TaskRepository, TaskStatus, MAX_RETRY_DELAY,
};
use scheduler_infrastructure::{InMemoryTaskRepository, MetricsCollector};
use scheduler_testing_utils::{FailingTaskRepository, HandlerBehavior, ScriptedHandler};
use scheduler_worker::{
    DefaultTaskHandler, ForwardingTaskHandler, LoggingMessageSink, SentMessage, TaskExecutor,
};

fn build_executor(repo: Arc<dyn TaskRepository>) -> TaskExecutor {
    TaskExecutor::new(repo, Arc::new(MetricsCollector::new()))
        .with_default_handler(Arc::new(DefaultTaskHandler::new(Duration::ZERO)))
}

#[tokio::test]
async fn test_handler_output_is_merged_into_result() {
    let repo = Arc::new(InMemoryTaskRepository::new());
    let executor = build_executor(repo.clone());
    let handler = ScriptedHandler::succeeding("scripted");
    executor.register_handler("SCRIPTED", handler.clone());

    let id = repo
        .add_task(Task::immediate("merge").with_tags(["SCRIPTED"]))
        .await
        .unwrap();
    executor.execute_task(&id).await.unwrap();

    let task = repo.get_task_by_id(&id).await.unwrap();
    let result = task.execution_result.unwrap();
    assert_eq!(result["handled_by"], "scripted");
    assert_eq!(result["outcome"], "success");
    assert_eq!(handler.calls(), 1);
}

#[tokio::test]
async fn test_retry_then_success() {
    let repo = Arc::new(InMemoryTaskRepository::new());
    let executor = build_executor(repo.clone());
    executor.register_handler(
        "FLAKY",
        ScriptedHandler::new("flaky", HandlerBehavior::FailTimes(1)),
    );

    let id = repo
        .add_task(
            Task::immediate("flaky")
                .with_tags(["FLAKY"])
                .with_retry_policy(RetryPolicy::new(3, Duration::from_millis(1), 1.0)),
        )
        .await
        .unwrap();

    assert_eq!(executor.execute_task(&id).await.unwrap(), TaskStatus::Retry);
    // RETRY 状态可以直接交给执行器
    assert_eq!(executor.execute_task(&id).await.unwrap(), TaskStatus::Done);

    let task = repo.get_task_by_id(&id).await.unwrap();
    assert_eq!(task.retry_count, 1);
    assert!(task.next_run_at.is_none());
}

#[tokio::test]
async fn test_unbounded_backoff_still_records_retry() {
    let repo = Arc::new(InMemoryTaskRepository::new());
    let executor = build_executor(repo.clone());
    executor.register_handler("FAIL", ScriptedHandler::failing("fail"));

    for (factor, retry_count) in [(10.0, 13), (1e300, 1)] {
        let mut task = Task::immediate("steep")
            .with_tags(["FAIL"])
            .with_retry_policy(RetryPolicy::new(20, Duration::from_millis(1000), factor));
        task.retry_count = retry_count;
        let id = repo.add_task(task).await.unwrap();

        assert_eq!(executor.execute_task(&id).await.unwrap(), TaskStatus::Retry);

        let task = repo.get_task_by_id(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Retry);
        assert_eq!(task.retry_count, retry_count + 1);
        let next_run_at = task.next_run_at.unwrap();
        let latest = Utc::now() + ChronoDuration::from_std(MAX_RETRY_DELAY).unwrap();
        assert!(next_run_at > Utc::now() && next_run_at <= latest);
    }
}

#[tokio::test]
async fn test_persistence_failure_is_returned() {
    let executor = build_executor(Arc::new(FailingTaskRepository));
    let err = executor.execute_task("any").await.unwrap_err();
    assert!(matches!(err, SchedulerError::Persistence(_)));
}

#[tokio::test]
async fn test_forwarding_handler_through_executor() {
    let repo = Arc::new(InMemoryTaskRepository::new());
    let executor = build_executor(repo.clone());
    let sink = Arc::new(LoggingMessageSink::new());
    executor.register_handler(
        "MATTERMOST",
        Arc::new(ForwardingTaskHandler::new(sink.clone(), "alerts")),
    );

    let id = repo
        .add_task(
            Task::immediate("forward")
                .with_tags(["MATTERMOST"])
                .with_parameter("forward_type", "channel_message")
                .with_parameter("target_channel_id", "ops")
                .with_parameter("message", "deploy finished"),
        )
        .await
        .unwrap();

    assert_eq!(executor.execute_task(&id).await.unwrap(), TaskStatus::Done);
    assert_eq!(
        sink.sent(),
        vec![SentMessage::Channel {
            channel_id: "ops".to_string(),
            message: "deploy finished".to_string(),
        }]
    );
}
