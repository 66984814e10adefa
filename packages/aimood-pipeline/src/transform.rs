use crate::error::TransformError;
use crate::item::Item;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

pub type TransformResult = std::result::Result<Vec<Item>, TransformError>;

/// One step of work applied to every item of a stage (search, fetch, label, ...)
///
/// A call may return zero, one or many output items. Errors stay with the
/// item: the stage logs them and drops the item, it never retries.
#[async_trait]
pub trait Transform: Send + Sync {
    /// Used in log lines when a call fails
    fn name(&self) -> &str;

    async fn call(&self, item: Item) -> TransformResult;
}

#[async_trait]
impl<T: Transform + ?Sized> Transform for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn call(&self, item: Item) -> TransformResult {
        (**self).call(item).await
    }
}

/// Adapts an async closure into a `Transform`
pub struct FnTransform<F> {
    name: String,
    f: F,
}

impl<F, Fut> FnTransform<F>
where
    F: Fn(Item) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = TransformResult> + Send + 'static,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F, Fut> Transform for FnTransform<F>
where
    F: Fn(Item) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = TransformResult> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, item: Item) -> TransformResult {
        (self.f)(item).await
    }
}

/// Shorthand for `Arc::new(FnTransform::new(name, f))`
pub fn transform_fn<F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn Transform>
where
    F: Fn(Item) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = TransformResult> + Send + 'static,
{
    Arc::new(FnTransform::new(name, f))
}
