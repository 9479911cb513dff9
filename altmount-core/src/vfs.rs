use async_trait::async_trait;

use altmount_model::HealthEvent;

/// Fire-and-forget cache invalidation towards the mounted filesystem.
/// Failures are the notifier's problem; callers never await correctness.
#[async_trait]
pub trait VfsNotifier: Send + Sync {
    async fn invalidate(&self, path: &str, event: &HealthEvent);
}

/// Default notifier for deployments without a mounted VFS (tests, CLI
/// tooling).
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopVfsNotifier;

#[async_trait]
impl VfsNotifier for NoopVfsNotifier {
    async fn invalidate(&self, _path: &str, _event: &HealthEvent) {}
}
