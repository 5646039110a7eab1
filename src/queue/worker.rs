//! Worker trait and before-work hook

use std::future::Future;

use async_trait::async_trait;
use eyre::Result;

use super::task::TaskInfo;

/// The single function a queue runs every task through
///
/// Implemented for any `Fn(TaskInfo<P>) -> impl Future<Output = eyre::Result<R>>`,
/// so an async closure is usually all a caller needs.
#[async_trait]
pub trait Worker<P, R>: Send + Sync {
    async fn work(&self, task: TaskInfo<P>) -> Result<R>;
}

#[async_trait]
impl<P, R, F, Fut> Worker<P, R> for F
where
    P: Send + Sync + 'static,
    R: Send + 'static,
    F: Fn(TaskInfo<P>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<R>> + Send,
{
    async fn work(&self, task: TaskInfo<P>) -> Result<R> {
        (self)(task).await
    }
}

/// Hook run on each selected batch before dispatch
///
/// `Ok(None)` keeps the batch as selected. `Ok(Some(list))` replaces it: any
/// selected task missing from `list` is discarded. An error fails every task
/// of the batch.
pub type BeforeWork<P> = Box<dyn Fn(Vec<TaskInfo<P>>) -> Result<Option<Vec<TaskInfo<P>>>> + Send + Sync>;
