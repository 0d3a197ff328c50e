//! Interceptor pipeline
//!
//! Three ordered chains of pure transforms wrapped around one call:
//!
//! ```text
//! request ─▶ [req 1] ─▶ [req 2] ─▶ call ─┬─ Ok  ─▶ [resp 1] ─▶ [resp 2] ─▶ Ok(response)
//!                                        └─ Err ─▶ [err 1]  ─▶ [err 2]  ─▶ Err(error)
//! ```
//!
//! Every chain runs in insertion order. Error stages take and return the
//! error, so they can rewrite it but cannot turn a failure into a success.
//! The breaker and retry executor usually live inside `call`.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

type RequestStage<Req> = Arc<dyn Fn(Req) -> Req + Send + Sync>;
type ResponseStage<Resp> = Arc<dyn Fn(Resp) -> Resp + Send + Sync>;
type ErrorStage<E> = Arc<dyn Fn(E) -> E + Send + Sync>;

/// Which chain a stage belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Request,
    Response,
    Error,
}

/// Returned on registration; pass to [`InterceptorPipeline::eject`] to remove the stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterceptorHandle {
    id: u64,
    kind: StageKind,
}

impl InterceptorHandle {
    pub fn kind(&self) -> StageKind {
        self.kind
    }
}

struct Chain<S> {
    stages: RwLock<Vec<(u64, S)>>,
}

impl<S: Clone> Chain<S> {
    fn new() -> Self {
        Self {
            stages: RwLock::new(Vec::new()),
        }
    }

    fn push(&self, id: u64, stage: S) {
        self.stages
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((id, stage));
    }

    fn remove(&self, id: u64) -> bool {
        let mut stages = self
            .stages
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = stages.len();
        stages.retain(|(stage_id, _)| *stage_id != id);
        stages.len() != before
    }

    /// Clone the stage list so no lock is held while user code runs
    fn snapshot(&self) -> Vec<S> {
        self.stages
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(_, stage)| stage.clone())
            .collect()
    }

    fn len(&self) -> usize {
        self.stages
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    fn clear(&self) {
        self.stages
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}

/// Ordered request, response and error transforms around a single call
pub struct InterceptorPipeline<Req, Resp, E> {
    next_id: AtomicU64,
    request: Chain<RequestStage<Req>>,
    response: Chain<ResponseStage<Resp>>,
    error: Chain<ErrorStage<E>>,
}

impl<Req, Resp, E> Default for InterceptorPipeline<Req, Resp, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Req, Resp, E> fmt::Debug for InterceptorPipeline<Req, Resp, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorPipeline")
            .field("request", &self.request.len())
            .field("response", &self.response.len())
            .field("error", &self.error.len())
            .finish()
    }
}

impl<Req, Resp, E> InterceptorPipeline<Req, Resp, E> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            request: Chain::new(),
            response: Chain::new(),
            error: Chain::new(),
        }
    }

    fn handle(&self, kind: StageKind) -> InterceptorHandle {
        InterceptorHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            kind,
        }
    }

    /// Append a request transform
    pub fn add_request<F>(&self, stage: F) -> InterceptorHandle
    where
        F: Fn(Req) -> Req + Send + Sync + 'static,
    {
        let handle = self.handle(StageKind::Request);
        self.request.push(handle.id, Arc::new(stage));
        handle
    }

    /// Append a response transform
    pub fn add_response<F>(&self, stage: F) -> InterceptorHandle
    where
        F: Fn(Resp) -> Resp + Send + Sync + 'static,
    {
        let handle = self.handle(StageKind::Response);
        self.response.push(handle.id, Arc::new(stage));
        handle
    }

    /// Append an error transform
    pub fn add_error<F>(&self, stage: F) -> InterceptorHandle
    where
        F: Fn(E) -> E + Send + Sync + 'static,
    {
        let handle = self.handle(StageKind::Error);
        self.error.push(handle.id, Arc::new(stage));
        handle
    }

    /// Remove a previously registered stage. Returns false if it was already gone.
    pub fn eject(&self, handle: InterceptorHandle) -> bool {
        match handle.kind {
            StageKind::Request => self.request.remove(handle.id),
            StageKind::Response => self.response.remove(handle.id),
            StageKind::Error => self.error.remove(handle.id),
        }
    }

    /// Number of stages in one chain
    pub fn len(&self, kind: StageKind) -> usize {
        match kind {
            StageKind::Request => self.request.len(),
            StageKind::Response => self.response.len(),
            StageKind::Error => self.error.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.request.len() + self.response.len() + self.error.len() == 0
    }

    pub fn clear(&self) {
        self.request.clear();
        self.response.clear();
        self.error.clear();
    }

    pub fn apply_request(&self, request: Req) -> Req {
        self.request
            .snapshot()
            .iter()
            .fold(request, |request, stage| stage(request))
    }

    pub fn apply_response(&self, response: Resp) -> Resp {
        self.response
            .snapshot()
            .iter()
            .fold(response, |response, stage| stage(response))
    }

    pub fn apply_error(&self, error: E) -> E {
        self.error
            .snapshot()
            .iter()
            .fold(error, |error, stage| stage(error))
    }

    /// Transform `request`, hand it to `call`, then transform the outcome
    pub async fn run<F, Fut>(&self, request: Req, call: F) -> Result<Resp, E>
    where
        F: FnOnce(Req) -> Fut,
        Fut: Future<Output = Result<Resp, E>>,
    {
        let request = self.apply_request(request);
        match call(request).await {
            Ok(response) => Ok(self.apply_response(response)),
            Err(error) => Err(self.apply_error(error)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Pipeline = InterceptorPipeline<Vec<String>, String, String>;

    #[tokio::test]
    async fn test_request_stages_run_in_insertion_order() {
        let pipeline = Pipeline::new();
        pipeline.add_request(|mut req| {
            req.push("first".to_string());
            req
        });
        pipeline.add_request(|mut req| {
            req.push("second".to_string());
            req
        });

        let seen = pipeline
            .run(Vec::new(), |req| async move { Ok(req.join(",")) })
            .await;

        assert_eq!(seen.unwrap(), "first,second");
    }

    #[tokio::test]
    async fn test_response_stages_transform_success() {
        let pipeline = Pipeline::new();
        pipeline.add_response(|resp| format!("{}!", resp));
        pipeline.add_response(|resp| resp.to_uppercase());

        let result = pipeline
            .run(Vec::new(), |_| async { Ok("ok".to_string()) })
            .await;

        assert_eq!(result.unwrap(), "OK!");
    }

    #[tokio::test]
    async fn test_error_stages_rewrite_but_propagate() {
        let pipeline = Pipeline::new();
        pipeline.add_response(|_| "should not run".to_string());
        pipeline.add_error(|err| format!("wrapped({})", err));
        pipeline.add_error(|err| format!("{} [tagged]", err));

        let result = pipeline
            .run(Vec::new(), |_| async { Err("refused".to_string()) })
            .await;

        assert_eq!(result, Err("wrapped(refused) [tagged]".to_string()));
    }

    #[tokio::test]
    async fn test_eject_removes_only_that_stage() {
        let pipeline = Pipeline::new();
        let first = pipeline.add_response(|resp| format!("{}-a", resp));
        pipeline.add_response(|resp| format!("{}-b", resp));
        assert_eq!(pipeline.len(StageKind::Response), 2);

        assert!(pipeline.eject(first));
        assert!(!pipeline.eject(first));
        assert_eq!(pipeline.apply_response("x".to_string()), "x-b");
    }

    #[test]
    fn test_handles_are_unique_per_kind() {
        let pipeline = Pipeline::new();
        let req = pipeline.add_request(|r| r);
        let err = pipeline.add_error(|e| e);

        assert_ne!(req, err);
        assert_eq!(req.kind(), StageKind::Request);
        // An error handle never removes a request stage
        assert!(pipeline.eject(err));
        assert_eq!(pipeline.len(StageKind::Request), 1);

        pipeline.clear();
        assert!(pipeline.is_empty());
    }
}
