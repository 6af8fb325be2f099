//! Capability contract for pooled resources.
//!
//! A pool knows nothing about the resources it holds. It only relies on
//! [`Manage`] to construct, health-check and tear them down. Implement the
//! trait directly for a dedicated manager type, or build an [`FnManager`]
//! from three closures.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};

use crate::context::Context;
use crate::error::{BoxError, Error, Result};

/// Creates, validates and destroys resources on behalf of a pool.
pub trait Manage: Send + Sync + 'static {
    /// The pooled resource type.
    type Resource: Send + 'static;

    /// Error returned by `create` and `teardown`.
    type Error: Into<BoxError> + Send + 'static;

    /// Construct a new resource.
    fn create(
        &self,
        ctx: &Context,
    ) -> impl Future<Output = std::result::Result<Self::Resource, Self::Error>> + Send;

    /// Report whether an existing resource is still healthy.
    ///
    /// Gets exclusive access, so a check may also reset per-session state.
    fn validate(&self, _resource: &mut Self::Resource) -> impl Future<Output = bool> + Send {
        async { true }
    }

    /// Release the resource's external state (close a socket, a handle...).
    fn teardown(
        &self,
        resource: Self::Resource,
    ) -> impl Future<Output = std::result::Result<(), Self::Error>> + Send {
        async move {
            drop(resource);
            Ok(())
        }
    }
}

type Factory<T> = Arc<dyn Fn() -> BoxFuture<'static, std::result::Result<T, BoxError>> + Send + Sync>;
type Validator<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;
type Teardown<T> =
    Arc<dyn Fn(T) -> BoxFuture<'static, std::result::Result<(), BoxError>> + Send + Sync>;

/// [`Manage`] implementation assembled from closures.
///
/// The validator runs synchronously and should stay cheap; factory and
/// teardown are async.
pub struct FnManager<T> {
    factory: Factory<T>,
    validator: Option<Validator<T>>,
    teardown: Teardown<T>,
}

impl<T> Clone for FnManager<T> {
    fn clone(&self) -> Self {
        Self {
            factory: Arc::clone(&self.factory),
            validator: self.validator.clone(),
            teardown: Arc::clone(&self.teardown),
        }
    }
}

impl<T> fmt::Debug for FnManager<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnManager")
            .field("validator", &self.validator.is_some())
            .finish()
    }
}

impl<T: Send + 'static> FnManager<T> {
    /// Start building a closure-based manager.
    #[must_use]
    pub fn builder() -> FnManagerBuilder<T> {
        FnManagerBuilder::default()
    }
}

impl<T: Send + 'static> Manage for FnManager<T> {
    type Resource = T;
    type Error = BoxError;

    fn create(
        &self,
        _ctx: &Context,
    ) -> impl Future<Output = std::result::Result<T, BoxError>> + Send {
        (self.factory)()
    }

    fn validate(&self, resource: &mut T) -> impl Future<Output = bool> + Send {
        let healthy = self.validator.as_ref().is_none_or(|check| check(&*resource));
        async move { healthy }
    }

    fn teardown(&self, resource: T) -> impl Future<Output = std::result::Result<(), BoxError>> + Send {
        (self.teardown)(resource)
    }
}

/// Builder for [`FnManager`]. Factory and teardown are mandatory.
pub struct FnManagerBuilder<T> {
    factory: Option<Factory<T>>,
    validator: Option<Validator<T>>,
    teardown: Option<Teardown<T>>,
}

impl<T> Default for FnManagerBuilder<T> {
    fn default() -> Self {
        Self {
            factory: None,
            validator: None,
            teardown: None,
        }
    }
}

impl<T: Send + 'static> FnManagerBuilder<T> {
    /// Set the async factory producing new resources.
    pub fn factory<F, Fut, E>(mut self, factory: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.factory = Some(Arc::new(move || {
            let fut = factory();
            async move { fut.await.map_err(Into::<BoxError>::into) }.boxed()
        }));
        self
    }

    /// Set the health check. Without one every resource is healthy.
    pub fn validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Set the async teardown releasing a resource's external state.
    pub fn teardown<F, Fut, E>(mut self, teardown: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.teardown = Some(Arc::new(move |resource| {
            let fut = teardown(resource);
            async move { fut.await.map_err(Into::<BoxError>::into) }.boxed()
        }));
        self
    }

    /// Finish the manager.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] when the factory or teardown is missing.
    pub fn build(self) -> Result<FnManager<T>> {
        let factory = self
            .factory
            .ok_or_else(|| Error::configuration("a factory function is required"))?;
        let teardown = self
            .teardown
            .ok_or_else(|| Error::configuration("a teardown function is required"))?;
        Ok(FnManager {
            factory,
            validator: self.validator,
            teardown,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting_manager(torn_down: Arc<AtomicU32>) -> FnManager<u32> {
        FnManager::builder()
            .factory(|| async { Ok::<_, Infallible>(7) })
            .validator(|value: &u32| *value % 2 == 1)
            .teardown(move |_value| {
                let torn_down = Arc::clone(&torn_down);
                async move {
                    torn_down.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, Infallible>(())
                }
            })
            .build()
            .unwrap()
    }

    #[test]
    fn missing_factory_is_configuration_error() {
        let result = FnManager::<u32>::builder()
            .teardown(|_| async { Ok::<_, Infallible>(()) })
            .build();
        assert!(matches!(result, Err(Error::Configuration { .. })));
    }

    #[test]
    fn missing_teardown_is_configuration_error() {
        let result = FnManager::<u32>::builder()
            .factory(|| async { Ok::<_, Infallible>(1) })
            .build();
        assert!(matches!(result, Err(Error::Configuration { .. })));
    }

    #[tokio::test]
    async fn closures_are_wired_through() {
        let torn_down = Arc::new(AtomicU32::new(0));
        let manager = counting_manager(Arc::clone(&torn_down));

        let mut value = manager.create(&Context::new()).await.unwrap();
        assert_eq!(value, 7);
        assert!(manager.validate(&mut value).await);
        assert!(!manager.validate(&mut 8).await);

        manager.teardown(value).await.unwrap();
        assert_eq!(torn_down.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn factory_errors_are_boxed() {
        let manager = FnManager::<u32>::builder()
            .factory(|| async { Err::<u32, _>(std::io::Error::other("refused")) })
            .teardown(|_| async { Ok::<_, Infallible>(()) })
            .build()
            .unwrap();

        let err = manager.create(&Context::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "refused");
    }
}
