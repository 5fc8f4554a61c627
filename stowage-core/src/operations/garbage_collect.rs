use crate::{GarbageCollector, GcReport, GcRequest, Result, StopSignal};
use std::sync::Arc;

#[derive(Clone)]
pub struct GarbageCollectOperation {
    collector: Arc<GarbageCollector>,
}

#[derive(Debug, Clone, Default)]
pub struct GarbageCollectOperationRequest {
    pub dry_run: bool,
    pub stop: StopSignal,
}

pub type GarbageCollectOperationResult = GcReport;

impl GarbageCollectOperation {
    pub fn new(collector: Arc<GarbageCollector>) -> Self {
        Self { collector }
    }

    pub async fn run(
        &self,
        request: GarbageCollectOperationRequest,
    ) -> Result<GarbageCollectOperationResult> {
        let GarbageCollectOperationRequest { dry_run, stop } = request;
        self.collector.run(GcRequest { dry_run, stop }).await
    }
}
