use std::sync::Arc;

use crate::auth::ClientTokenVerifier;
use crate::db::queries::JobStore;
use crate::services::queue::TaskQueue;
use crate::services::results::ResultQueryService;
use crate::services::submission::SubmissionService;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub submissions: Arc<SubmissionService>,
    pub results: Arc<ResultQueryService>,
    pub jobs: Arc<dyn JobStore>,
    pub queue: Arc<dyn TaskQueue>,
    pub tokens: Arc<ClientTokenVerifier>,
}

impl AppState {
    pub fn new(
        submissions: SubmissionService,
        results: ResultQueryService,
        jobs: Arc<dyn JobStore>,
        queue: Arc<dyn TaskQueue>,
        tokens: ClientTokenVerifier,
    ) -> Self {
        Self {
            submissions: Arc::new(submissions),
            results: Arc::new(results),
            jobs,
            queue,
            tokens: Arc::new(tokens),
        }
    }
}
