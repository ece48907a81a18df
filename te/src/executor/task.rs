//! Task function trait and adapters

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

use crate::error::BoxError;

/// A zero-argument unit of work whose result is a JSON value
///
/// Any `Fn() -> impl Future<Output = Result<T, E>>` closure is a `TaskFn`
/// when `T: Serialize` and `E` converts into [`BoxError`]. Wrap synchronous
/// closures with [`blocking`].
#[async_trait]
pub trait TaskFn: Send + Sync {
    /// Run the work once
    async fn call(&self) -> Result<Value, BoxError>;
}

#[async_trait]
impl<F, Fut, T, E> TaskFn for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Serialize + Send + 'static,
    E: Into<BoxError> + Send + 'static,
{
    async fn call(&self) -> Result<Value, BoxError> {
        let output = (self)().await.map_err(Into::into)?;
        Ok(serde_json::to_value(output)?)
    }
}

/// Adapter running a synchronous closure on tokio's blocking pool
pub struct Blocking<F> {
    f: Arc<F>,
}

/// Wrap a synchronous closure as a [`TaskFn`]
///
/// A panic inside the closure counts as a failed attempt.
pub fn blocking<F, T, E>(f: F) -> Blocking<F>
where
    F: Fn() -> Result<T, E> + Send + Sync + 'static,
    T: Serialize + Send + 'static,
    E: Into<BoxError> + Send + 'static,
{
    Blocking { f: Arc::new(f) }
}

#[async_trait]
impl<F, T, E> TaskFn for Blocking<F>
where
    F: Fn() -> Result<T, E> + Send + Sync + 'static,
    T: Serialize + Send + 'static,
    E: Into<BoxError> + Send + 'static,
{
    async fn call(&self) -> Result<Value, BoxError> {
        debug!("Blocking::call: dispatching to blocking pool");
        let f = Arc::clone(&self.f);
        let output = tokio::task::spawn_blocking(move || f()).await?.map_err(Into::into)?;
        Ok(serde_json::to_value(output)?)
    }
}
