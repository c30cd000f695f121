//! Transform trait and implementations.
//!
//! A transform is the computation behind a stage: it receives the resolved
//! input artifacts and returns the bytes of the stage's output artifact. It
//! may perform external work (a training job, a remote preprocessing call)
//! but must not touch the pipeline's own state.

use async_trait::async_trait;
use std::fmt::Debug;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::core::Artifact;

/// Trait for stage transforms.
#[async_trait]
pub trait Transform: Send + Sync + Debug {
    /// Produces the output content from the input artifacts.
    ///
    /// Inputs arrive in the order the stage declared them. Any error counts
    /// as a failed attempt and may be retried.
    async fn apply(&self, inputs: &[Artifact]) -> anyhow::Result<Vec<u8>>;
}

/// A function-based transform for synchronous work.
///
/// The function runs on tokio's blocking pool, so a slow or CPU-bound body
/// neither stalls the runtime nor escapes the stage timeout. Panics in the
/// function propagate to the caller.
pub struct FnTransform<F>
where
    F: Fn(&[Artifact]) -> anyhow::Result<Vec<u8>> + Send + Sync + 'static,
{
    name: String,
    func: Arc<F>,
}

impl<F> FnTransform<F>
where
    F: Fn(&[Artifact]) -> anyhow::Result<Vec<u8>> + Send + Sync + 'static,
{
    /// Creates a new function-based transform.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }
}

impl<F> Debug for FnTransform<F>
where
    F: Fn(&[Artifact]) -> anyhow::Result<Vec<u8>> + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTransform")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl<F> Transform for FnTransform<F>
where
    F: Fn(&[Artifact]) -> anyhow::Result<Vec<u8>> + Send + Sync + 'static,
{
    async fn apply(&self, inputs: &[Artifact]) -> anyhow::Result<Vec<u8>> {
        let func = Arc::clone(&self.func);
        let inputs = inputs.to_vec();
        match tokio::task::spawn_blocking(move || func(&inputs)).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(anyhow::anyhow!("transform '{}' did not complete: {e}", self.name)),
        }
    }
}

/// An async function-based transform.
///
/// The function receives owned copies of the inputs so the returned future
/// can be `'static`.
pub struct AsyncFnTransform<F, Fut>
where
    F: Fn(Vec<Artifact>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Vec<u8>>> + Send,
{
    name: String,
    func: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> AsyncFnTransform<F, Fut>
where
    F: Fn(Vec<Artifact>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Vec<u8>>> + Send,
{
    /// Creates a new async function-based transform.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
            _phantom: PhantomData,
        }
    }
}

impl<F, Fut> Debug for AsyncFnTransform<F, Fut>
where
    F: Fn(Vec<Artifact>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Vec<u8>>> + Send,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncFnTransform")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl<F, Fut> Transform for AsyncFnTransform<F, Fut>
where
    F: Fn(Vec<Artifact>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Vec<u8>>> + Send,
{
    async fn apply(&self, inputs: &[Artifact]) -> anyhow::Result<Vec<u8>> {
        (self.func)(inputs.to_vec()).await
    }
}

/// A transform that passes its single input through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityTransform;

#[async_trait]
impl Transform for IdentityTransform {
    async fn apply(&self, inputs: &[Artifact]) -> anyhow::Result<Vec<u8>> {
        match inputs {
            [single] => Ok(single.content.clone()),
            _ => anyhow::bail!("identity transform expects exactly one input, got {}", inputs.len()),
        }
    }
}
