use std::sync::Arc;

use crate::messaging::MessagingProvider;
use crate::orchestration::{AcceptanceGuard, DispatchEngine, ReconciliationEngine};

/// Shared state for every request handler
#[derive(Debug, Clone)]
pub struct AppState {
    pub guard: Arc<AcceptanceGuard>,
    pub provider: Arc<MessagingProvider>,
    pub dispatch_engine: Option<Arc<DispatchEngine>>,
    pub reconciliation_engine: Option<Arc<ReconciliationEngine>>,
    /// Queues whose depth is reported by the health endpoint
    pub queues: Vec<String>,
}

impl AppState {
    pub fn new(guard: Arc<AcceptanceGuard>, provider: Arc<MessagingProvider>) -> Self {
        Self {
            guard,
            provider,
            dispatch_engine: None,
            reconciliation_engine: None,
            queues: Vec::new(),
        }
    }

    pub fn with_engines(
        mut self,
        dispatch_engine: Arc<DispatchEngine>,
        reconciliation_engine: Arc<ReconciliationEngine>,
    ) -> Self {
        self.dispatch_engine = Some(dispatch_engine);
        self.reconciliation_engine = Some(reconciliation_engine);
        self
    }

    pub fn with_queues(mut self, queues: Vec<String>) -> Self {
        self.queues = queues;
        self
    }
}
