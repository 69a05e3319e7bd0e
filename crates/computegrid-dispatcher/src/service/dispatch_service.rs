//! DispatchService implementation - submit tasks and observe their results.

use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tonic::{Request, Response, Status};
use tracing::{debug, warn};

use computegrid_core::{DispatchRecord, TaskId};
use computegrid_proto::pb::{
    self, GetTaskResultRequest, ServerStatus, ServerStatusRequest, SubmitTaskRequest,
    SubmitTaskResponse, TaskResult,
};
use computegrid_proto::{DispatchService, DispatchServiceServer};

use crate::error::DispatchError;
use crate::identity::Principal;
use crate::service::auth::bearer_token;
use crate::state::AppState;

/// gRPC DispatchService implementation.
pub struct DispatchServiceImpl {
    state: Arc<AppState>,
}

impl DispatchServiceImpl {
    /// Create a new DispatchServiceImpl.
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Convert into a tonic server.
    pub fn into_server(self) -> DispatchServiceServer<Self> {
        DispatchServiceServer::new(self)
    }

    #[allow(clippy::result_large_err)]
    async fn authorize<T>(&self, request: &Request<T>) -> Result<Principal, Status> {
        let token = bearer_token(request);
        self.state
            .gate
            .authorize(token.as_deref())
            .await
            .map_err(|e| {
                warn!(error = %e, "Dispatch call refused");
                Status::from(e)
            })
    }
}

#[allow(clippy::result_large_err)]
fn parse_task_id(raw: String) -> Result<TaskId, Status> {
    if raw.is_empty() {
        return Err(Status::invalid_argument("task_id cannot be empty"));
    }
    Ok(TaskId::new(raw))
}

#[allow(clippy::result_large_err)]
fn check_owner(principal: &Principal, record: &DispatchRecord) -> Result<(), Status> {
    if principal.can_read(record) {
        return Ok(());
    }
    warn!(
        task_id = %record.task_id,
        caller = %principal.username,
        "Result read refused"
    );
    Err(DispatchError::NotOwner(record.task_id.clone()).into())
}

#[tonic::async_trait]
impl DispatchService for DispatchServiceImpl {
    type StreamResultsStream =
        Pin<Box<dyn tokio_stream::Stream<Item = Result<TaskResult, Status>> + Send>>;

    async fn submit_task(
        &self,
        request: Request<SubmitTaskRequest>,
    ) -> Result<Response<SubmitTaskResponse>, Status> {
        let principal = self.authorize(&request).await?;
        let req = request.into_inner();

        let requested = (!req.task_id.is_empty()).then(|| TaskId::new(req.task_id));
        let task_id = self
            .state
            .dispatcher
            .submit(requested, req.serialized_task, &principal)
            .await?;

        Ok(Response::new(SubmitTaskResponse {
            task_id: task_id.into_inner(),
            status: pb::DispatchStatus::Queued.into(),
            message: "Task queued".to_string(),
        }))
    }

    async fn get_task_result(
        &self,
        request: Request<GetTaskResultRequest>,
    ) -> Result<Response<TaskResult>, Status> {
        let principal = self.authorize(&request).await?;
        let task_id = parse_task_id(request.into_inner().task_id)?;

        let record = self
            .state
            .dispatcher
            .result(&task_id)
            .await
            .ok_or_else(|| DispatchError::TaskNotFound(task_id.clone()))?;
        check_owner(&principal, &record)?;

        Ok(Response::new(TaskResult::from(&record)))
    }

    async fn stream_results(
        &self,
        request: Request<GetTaskResultRequest>,
    ) -> Result<Response<Self::StreamResultsStream>, Status> {
        let principal = self.authorize(&request).await?;
        let task_id = parse_task_id(request.into_inner().task_id)?;

        let mut updates = self
            .state
            .dispatcher
            .subscribe(&task_id)
            .await
            .ok_or_else(|| DispatchError::TaskNotFound(task_id.clone()))?;
        check_owner(&principal, &updates.borrow())?;

        let (tx, rx) = mpsc::channel::<TaskResult>(16);
        tokio::spawn(async move {
            loop {
                let record = updates.borrow_and_update().clone();
                let terminal = record.is_terminal();
                if tx.send(TaskResult::from(&record)).await.is_err() {
                    debug!(task_id = %task_id, "Result stream closed by client");
                    return;
                }
                // A closed watch means the record was evicted.
                if terminal || updates.changed().await.is_err() {
                    return;
                }
            }
        });

        let outbound = ReceiverStream::new(rx).map(Ok);
        Ok(Response::new(Box::pin(outbound)))
    }

    async fn get_server_status(
        &self,
        request: Request<ServerStatusRequest>,
    ) -> Result<Response<ServerStatus>, Status> {
        self.authorize(&request).await?;
        let dispatcher = &self.state.dispatcher;
        let counters = dispatcher.counters();

        Ok(Response::new(ServerStatus {
            worker_count: u32::try_from(dispatcher.worker_count()).unwrap_or(u32::MAX),
            queue_capacity: u32::try_from(dispatcher.queue_capacity()).unwrap_or(u32::MAX),
            queued: counters.queued,
            running: counters.running,
            completed: counters.completed,
            failed: counters.failed,
            rejected: counters.rejected,
            task_kinds: dispatcher
                .registry()
                .task_kinds()
                .into_iter()
                .map(Into::into)
                .collect(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use computegrid_core::{Precision, TaskEnvelope};
    use computegrid_kernels::{default_registry, PiArgs, MONTE_CARLO_PI};
    use tonic::Code;

    use crate::config::Config;
    use crate::service::auth::AUTHORIZATION;

    fn state(require_auth: bool) -> Arc<AppState> {
        let config = Config {
            worker_count: 2,
            token_secret: "test-secret".into(),
            require_auth,
            ..Config::default()
        };
        let state = AppState::from_config(&config, default_registry());
        state.dispatcher.start();
        state
    }

    fn pi_request(task_id: &str) -> SubmitTaskRequest {
        let payload = TaskEnvelope::with_args(
            MONTE_CARLO_PI,
            Precision::Standard,
            &PiArgs {
                samples: 500,
                seed: Some(3),
            },
        )
        .unwrap()
        .encode()
        .unwrap();
        SubmitTaskRequest {
            task_id: task_id.to_string(),
            serialized_task: payload,
        }
    }

    fn with_token<T>(message: T, token: &str) -> Request<T> {
        let mut request = Request::new(message);
        request.metadata_mut().insert(
            AUTHORIZATION,
            format!("Bearer {}", token).parse().unwrap(),
        );
        request
    }

    #[tokio::test]
    async fn test_submit_acks_queued_with_generated_id() {
        let service = DispatchServiceImpl::new(state(false));

        let a = service
            .submit_task(Request::new(pi_request("")))
            .await
            .unwrap()
            .into_inner();
        let b = service
            .submit_task(Request::new(pi_request("")))
            .await
            .unwrap()
            .into_inner();

        assert!(!a.task_id.is_empty());
        assert_ne!(a.task_id, b.task_id);
        assert_eq!(a.status(), pb::DispatchStatus::Queued);
    }

    #[tokio::test]
    async fn test_result_stream_ends_with_terminal_status() {
        let service = DispatchServiceImpl::new(state(false));
        service
            .submit_task(Request::new(pi_request("stream-me")))
            .await
            .unwrap();

        let mut stream = service
            .stream_results(Request::new(GetTaskResultRequest {
                task_id: "stream-me".into(),
            }))
            .await
            .unwrap()
            .into_inner();

        let mut last = None;
        while let Some(item) = tokio::time::timeout(Duration::from_secs(10), stream.next())
            .await
            .unwrap()
        {
            last = Some(item.unwrap());
        }
        let last = last.unwrap();
        assert_eq!(last.status(), pb::DispatchStatus::Completed);
        let output: serde_json::Value = serde_json::from_slice(&last.output).unwrap();
        assert_eq!(output["samples"], 500);

        let polled = service
            .get_task_result(Request::new(GetTaskResultRequest {
                task_id: "stream-me".into(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(polled.status(), pb::DispatchStatus::Completed);
    }

    #[tokio::test]
    async fn test_unknown_and_empty_task_ids() {
        let service = DispatchServiceImpl::new(state(false));
        let err = service
            .get_task_result(Request::new(GetTaskResultRequest {
                task_id: "missing".into(),
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::NotFound);

        let err = service
            .get_task_result(Request::new(GetTaskResultRequest {
                task_id: String::new(),
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_token_gate_protects_dispatch() {
        let state = state(true);
        let token = state.identity.register("alice", "pw", None).await.unwrap();
        let service = DispatchServiceImpl::new(state.clone());

        let err = service
            .submit_task(Request::new(pi_request("")))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::Unauthenticated);

        let err = service
            .submit_task(with_token(pi_request(""), "forged.token"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::Unauthenticated);

        let ack = service
            .submit_task(with_token(pi_request("owned"), &token))
            .await
            .unwrap()
            .into_inner();
        let record = state
            .dispatcher
            .result(&TaskId::new(ack.task_id))
            .await
            .unwrap();
        assert_eq!(record.submitted_by, "alice");
    }

    #[tokio::test]
    async fn test_results_visible_to_submitter_and_admin_only() {
        let state = state(true);
        let alice = state.identity.register("alice", "pw", None).await.unwrap();
        let bob = state.identity.register("bob", "pw", None).await.unwrap();
        let root = state
            .identity
            .register("root", "pw", Some("admin"))
            .await
            .unwrap();
        let service = DispatchServiceImpl::new(state.clone());

        service
            .submit_task(with_token(pi_request("alice-task"), &alice))
            .await
            .unwrap();
        let query = || GetTaskResultRequest {
            task_id: "alice-task".into(),
        };

        let err = service
            .get_task_result(with_token(query(), &bob))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::PermissionDenied);
        let err = service
            .stream_results(with_token(query(), &bob))
            .await
            .err()
            .unwrap();
        assert_eq!(err.code(), Code::PermissionDenied);

        assert!(service
            .get_task_result(with_token(query(), &alice))
            .await
            .is_ok());
        assert!(service
            .get_task_result(with_token(query(), &root))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_server_status_lists_kinds() {
        let service = DispatchServiceImpl::new(state(false));
        let status = service
            .get_server_status(Request::new(ServerStatusRequest {}))
            .await
            .unwrap()
            .into_inner();

        assert_eq!(status.worker_count, 2);
        assert_eq!(status.task_kinds.len(), 3);
        assert!(status
            .task_kinds
            .iter()
            .any(|k| k.task_type == "mandelbrot" && k.precision() == pb::Precision::High));
    }
}
