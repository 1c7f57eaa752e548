//! Tests of the gRPC coordinator transport.
//!
//! These tests verify:
//! - The full session round trip against an in-process coordinator
//! - Rejections and failed jobs surfacing as typed submission errors
//! - Protocol violations surfacing as execution failures
//! - Connection failures when nothing is listening


use std::net::TcpListener;
use std::time::Duration;

use tempfile::TempDir;
use url::Url;
use uuid::Uuid;

use graph_dispatch::config::options;
use graph_dispatch::proto::JobState;
use graph_dispatch::{
    AccumulatorValue, ClientError, Configuration, ErrorKind, JobDescriptor, RemoteEnvironment,
    SubmissionError,
};
use test_harness::{
    accumulator, finished_event, spawn_coordinator, status_event, write_bundle,
    ScriptedCoordinator,
};

const NO_JARS: &[&str] = &[];

fn unused_port() -> u32 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    u32::from(port)
}

fn local_environment(port: u16, jars: &[&str]) -> RemoteEnvironment {
    let mut config = Configuration::new();
    config
        .set_integer(options::CONNECT_TIMEOUT_MS, 2000)
        .set_string(options::CLIENT_ID, "grpc-tests");
    let mut env =
        RemoteEnvironment::with_configuration("127.0.0.1", u32::from(port), config, jars).unwrap();
    env.disable_sysout_logging();
    let source = env.add_operator("source", "io.df.KafkaSource", &[]);
    env.add_operator("sink", "io.df.HdfsSink", &[source]);
    env
}

// ============================================================================
// Round trip
// ============================================================================

#[tokio::test]
async fn test_finished_job_returns_decoded_result() {
    let dir = TempDir::new().unwrap();
    let bundle = write_bundle(
        &dir,
        "metrics.jar",
        Some(r#"{"name":"metrics","types":["com.acme.Histogram"]}"#),
    );

    let job_id = Uuid::new_v4().to_string();
    let coordinator = ScriptedCoordinator::accepting(
        &job_id,
        vec![
            status_event(&job_id, JobState::Created, ""),
            status_event(&job_id, JobState::Running, ""),
            finished_event(
                &job_id,
                2500,
                vec![
                    accumulator("records", "long", "42"),
                    accumulator("hist", "com.acme.Histogram", r#"{"p99":12}"#),
                ],
            ),
        ],
    );
    let log = coordinator.log.clone();
    let (port, server) = spawn_coordinator(coordinator).await;

    let mut env = local_environment(port, &[bundle.to_str().unwrap()]);
    let descriptor = JobDescriptor::new("df-task-7", b"{}".to_vec());
    let result = env
        .execute_with_descriptor("nightly-etl", &descriptor)
        .await
        .unwrap();

    assert_eq!(result.job_id().to_string(), job_id);
    assert_eq!(result.net_runtime(), Duration::from_millis(2500));
    assert_eq!(
        result.accumulator("records"),
        Some(&AccumulatorValue::Long(42))
    );
    assert_eq!(
        result.accumulator("hist"),
        Some(&AccumulatorValue::Custom {
            type_name: "com.acme.Histogram".to_string(),
            origin: Url::from_file_path(&bundle).unwrap(),
            value: serde_json::json!({"p99": 12}),
        })
    );

    assert_eq!(log.open_sessions(), 1);
    assert_eq!(log.submits(), 1);
    assert_eq!(log.watches(), 1);
    assert_eq!(log.close_sessions(), 1);
    assert_eq!(*log.client_ids.lock().unwrap(), vec!["grpc-tests".to_string()]);
    assert_eq!(*log.watched_jobs.lock().unwrap(), vec![job_id.clone()]);

    let submission = log.last_submission().unwrap();
    let graph = submission.graph.unwrap();
    assert_eq!(graph.job_name, "nightly-etl");
    assert_eq!(graph.vertices.len(), 2);
    assert_eq!(graph.edges.len(), 1);
    assert_eq!(submission.artifacts.len(), 1);
    assert_eq!(submission.descriptor.unwrap().id, "df-task-7");

    server.abort();
}

#[tokio::test]
async fn test_graph_job_id_is_used_when_coordinator_assigns_none() {
    let coordinator =
        ScriptedCoordinator::accepting("", vec![finished_event("", 10, Vec::new())]);
    let log = coordinator.log.clone();
    let (port, server) = spawn_coordinator(coordinator).await;

    let mut env = local_environment(port, NO_JARS);
    let result = env.execute("anonymous").await.unwrap();

    let submitted_id = log.last_submission().unwrap().graph.unwrap().job_id;
    assert_eq!(result.job_id().to_string(), submitted_id);
    assert_eq!(log.close_sessions(), 1);

    server.abort();
}

// ============================================================================
// Job failures
// ============================================================================

#[tokio::test]
async fn test_rejected_job_is_a_typed_submission_error() {
    let coordinator = ScriptedCoordinator::rejecting("", "no free slots");
    let log = coordinator.log.clone();
    let (port, server) = spawn_coordinator(coordinator).await;

    let mut env = local_environment(port, NO_JARS);
    let err = env.execute("too-big").await.unwrap_err();

    match err {
        ClientError::Submission(SubmissionError::Rejected { message, .. }) => {
            assert_eq!(message, "no free slots")
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(log.watches(), 0);
    assert_eq!(log.close_sessions(), 1);

    server.abort();
}

#[tokio::test]
async fn test_failed_and_canceled_jobs_are_job_failures() {
    for (state, expected) in [(JobState::Failed, "FAILED"), (JobState::Canceled, "CANCELED")] {
        let job_id = Uuid::new_v4().to_string();
        let coordinator = ScriptedCoordinator::accepting(
            &job_id,
            vec![
                status_event(&job_id, JobState::Running, ""),
                status_event(&job_id, state, "operator sink crashed"),
            ],
        );
        let log = coordinator.log.clone();
        let (port, server) = spawn_coordinator(coordinator).await;

        let mut env = local_environment(port, NO_JARS);
        let err = env.execute("doomed").await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Submission);
        match err {
            ClientError::Submission(SubmissionError::JobFailed {
                job_id: failed_id,
                state,
                message,
            }) => {
                assert_eq!(failed_id, job_id);
                assert_eq!(state, expected);
                assert_eq!(message, "operator sink crashed");
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(log.close_sessions(), 1);

        server.abort();
    }
}

// ============================================================================
// Protocol violations
// ============================================================================

#[tokio::test]
async fn test_finished_without_result_is_an_execution_failure() {
    let job_id = Uuid::new_v4().to_string();
    let coordinator = ScriptedCoordinator::accepting(
        &job_id,
        vec![status_event(&job_id, JobState::Finished, "")],
    );
    let log = coordinator.log.clone();
    let (port, server) = spawn_coordinator(coordinator).await;

    let mut env = local_environment(port, NO_JARS);
    let err = env.execute("empty-finish").await.unwrap_err();

    assert!(matches!(
        err,
        ClientError::Submission(SubmissionError::ExecutionFailed { .. })
    ));
    assert!(err.to_string().contains("FINISHED without a result"));
    assert_eq!(log.close_sessions(), 1);

    server.abort();
}

#[tokio::test]
async fn test_stream_closing_early_is_an_execution_failure() {
    let job_id = Uuid::new_v4().to_string();
    let coordinator = ScriptedCoordinator::accepting(
        &job_id,
        vec![status_event(&job_id, JobState::Running, "")],
    );
    let log = coordinator.log.clone();
    let (port, server) = spawn_coordinator(coordinator).await;

    let mut env = local_environment(port, NO_JARS);
    let err = env.execute("cut-off").await.unwrap_err();

    assert!(matches!(
        err,
        ClientError::Submission(SubmissionError::ExecutionFailed { .. })
    ));
    assert!(err
        .to_string()
        .contains("closed before the job reached a terminal state"));
    assert_eq!(log.close_sessions(), 1);

    server.abort();
}

#[tokio::test]
async fn test_invalid_coordinator_job_id_is_an_execution_failure() {
    let coordinator = ScriptedCoordinator::accepting("job-0001", Vec::new());
    let log = coordinator.log.clone();
    let (port, server) = spawn_coordinator(coordinator).await;

    let mut env = local_environment(port, NO_JARS);
    let err = env.execute("odd-id").await.unwrap_err();

    assert!(err.to_string().contains("invalid job id 'job-0001'"));
    assert_eq!(log.watches(), 0);
    assert_eq!(log.close_sessions(), 1);

    server.abort();
}

#[tokio::test]
async fn test_unknown_accumulator_type_is_a_user_code_error() {
    let job_id = Uuid::new_v4().to_string();
    let coordinator = ScriptedCoordinator::accepting(
        &job_id,
        vec![finished_event(
            &job_id,
            5,
            vec![accumulator("hist", "com.acme.Histogram", "{}")],
        )],
    );
    let log = coordinator.log.clone();
    let (port, server) = spawn_coordinator(coordinator).await;

    let mut env = local_environment(port, NO_JARS);
    let err = env.execute("no-bundle").await.unwrap_err();

    assert!(matches!(
        err,
        ClientError::Submission(SubmissionError::UserCode(_))
    ));
    assert_eq!(log.close_sessions(), 1);

    server.abort();
}

// ============================================================================
// Connection failures
// ============================================================================

#[tokio::test]
async fn test_unreachable_coordinator_is_a_connection_error() {
    let mut config = Configuration::new();
    config.set_integer(options::CONNECT_TIMEOUT_MS, 2000);

    let port = unused_port();
    let mut env = RemoteEnvironment::with_configuration("127.0.0.1", port, config, NO_JARS).unwrap();
    env.add_operator("source", "Source", &[]);

    let err = env.execute("nobody-home").await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Connection);
    assert!(err.is_recoverable());
    match err {
        ClientError::Connection { target, .. } => {
            assert_eq!(target.to_string(), format!("127.0.0.1:{}", port))
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(env.transformations().is_empty());
}

#[tokio::test]
async fn test_tls_without_ca_certificate_fails_to_connect() {
    let mut config = Configuration::new();
    config.set_bool(options::SSL_ENABLED, true);

    let mut env =
        RemoteEnvironment::with_configuration("127.0.0.1", unused_port(), config, NO_JARS).unwrap();
    env.add_operator("source", "Source", &[]);

    let err = env.execute("tls-job").await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Connection);
    assert!(err.to_string().contains("CA certificate"));
}
