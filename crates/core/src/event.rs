//! Emitter family: handler registration and failure-isolated fan-out.
//!
//! Handlers are reference-counted closures compared by identity: cloning a
//! handler keeps its identity, wrapping the same closure twice does not.
//! A failing handler (error or panic) is logged and never stops its
//! siblings from running.

use futures::future::{BoxFuture, join_all};
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::error;

/// The future returned by an async handler.
pub type HandlerFuture = BoxFuture<'static, anyhow::Result<()>>;

/// Identity comparison for registered callbacks.
pub trait HandlerIdentity {
    fn same_as(&self, other: &Self) -> bool;
}

/// A synchronous handler invoked with a borrowed event.
pub struct Handler<T>(Arc<dyn Fn(&T) -> anyhow::Result<()> + Send + Sync>);

impl<T> Handler<T> {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn call(&self, event: &T) -> anyhow::Result<()> {
        (self.0)(event)
    }
}

impl<T> Clone for Handler<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> HandlerIdentity for Handler<T> {
    fn same_as(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.0), Arc::as_ptr(&other.0))
    }
}

impl<T> std::fmt::Debug for Handler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Handler({:p})", Arc::as_ptr(&self.0) as *const ())
    }
}

/// An asynchronous handler that takes ownership of its event.
pub struct AsyncHandler<T>(Arc<dyn Fn(T) -> HandlerFuture + Send + Sync>);

impl<T: Send + 'static> AsyncHandler<T> {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self(Arc::new(move |event| Box::pin(f(event))))
    }

    /// Wrap a plain closure; it still runs inside the fan-out task.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self(Arc::new(move |event| {
            let result = f(event);
            Box::pin(async move { result })
        }))
    }

    pub fn call(&self, event: T) -> HandlerFuture {
        (self.0)(event)
    }
}

impl<T> Clone for AsyncHandler<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> HandlerIdentity for AsyncHandler<T> {
    fn same_as(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.0), Arc::as_ptr(&other.0))
    }
}

impl<T> std::fmt::Debug for AsyncHandler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AsyncHandler({:p})", Arc::as_ptr(&self.0) as *const ())
    }
}

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitReport {
    pub invoked: usize,
    pub failed: usize,
}

impl EmitReport {
    pub fn succeeded(&self) -> usize {
        self.invoked - self.failed
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn invoke_all<T>(handlers: &[Handler<T>], event: &T, label: &str) -> EmitReport {
    let mut report = EmitReport::default();
    for handler in handlers {
        report.invoked += 1;
        match catch_unwind(AssertUnwindSafe(|| handler.call(event))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                report.failed += 1;
                error!(event = %label, error = %e, "Handler failed");
            }
            Err(payload) => {
                report.failed += 1;
                error!(event = %label, panic = %panic_message(payload.as_ref()), "Handler panicked");
            }
        }
    }
    report
}

/// Run every handler as an independent task and wait for all of them to settle.
///
/// Must be polled inside a tokio runtime.
pub async fn settle_all<T>(handlers: Vec<AsyncHandler<T>>, event: T, label: String) -> EmitReport
where
    T: Clone + Send + 'static,
{
    let tasks = handlers.into_iter().map(|handler| {
        let event = event.clone();
        tokio::spawn(async move { handler.call(event).await })
    });

    let mut report = EmitReport::default();
    for outcome in join_all(tasks).await {
        report.invoked += 1;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                report.failed += 1;
                error!(event = %label, error = %e, "Async handler failed");
            }
            Err(join_error) => {
                report.failed += 1;
                let reason = if join_error.is_panic() {
                    panic_message(join_error.into_panic().as_ref())
                } else {
                    "cancelled".to_string()
                };
                error!(event = %label, panic = %reason, "Async handler did not complete");
            }
        }
    }
    report
}

/// A single-event emitter with synchronous handlers.
///
/// Registering the same handler twice is allowed and yields two calls per emit.
pub struct Emitter<T> {
    label: String,
    handlers: Mutex<Vec<Handler<T>>>,
}

impl<T> Emitter<T> {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            handlers: Mutex::new(Vec::new()),
        }
    }

    pub fn on(&self, handler: Handler<T>) {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    /// Remove every registration of `handler`. Returns whether any was found.
    pub fn off(&self, handler: &Handler<T>) -> bool {
        let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        let before = handlers.len();
        handlers.retain(|h| !h.same_as(handler));
        handlers.len() < before
    }

    pub fn emit(&self, event: &T) -> EmitReport {
        // Snapshot so handlers may register or remove handlers while running.
        let handlers = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        invoke_all(&handlers, event, &self.label)
    }

    pub fn len(&self) -> usize {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A keyed emitter with synchronous handlers.
pub struct EventEmitter<T> {
    handlers: Mutex<HashMap<String, Vec<Handler<T>>>>,
}

impl<T> Default for EventEmitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EventEmitter<T> {
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(HashMap::new()),
        }
    }

    pub fn on(&self, key: &str, handler: Handler<T>) {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.to_string())
            .or_default()
            .push(handler);
    }

    pub fn off(&self, key: &str, handler: &Handler<T>) -> bool {
        let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(list) = handlers.get_mut(key) else {
            return false;
        };
        let before = list.len();
        list.retain(|h| !h.same_as(handler));
        let removed = list.len() < before;
        if list.is_empty() {
            handlers.remove(key);
        }
        removed
    }

    pub fn emit(&self, key: &str, event: &T) -> EmitReport {
        let handlers = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
            .unwrap_or_default();
        invoke_all(&handlers, event, key)
    }

    pub fn handler_count(&self, key: &str) -> usize {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map_or(0, Vec::len)
    }
}

/// A keyed emitter whose handlers run concurrently and settle independently.
pub struct AsyncEventEmitter<T> {
    handlers: Mutex<HashMap<String, Vec<AsyncHandler<T>>>>,
}

impl<T: Clone + Send + 'static> Default for AsyncEventEmitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> AsyncEventEmitter<T> {
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(HashMap::new()),
        }
    }

    pub fn on(&self, key: &str, handler: AsyncHandler<T>) {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.to_string())
            .or_default()
            .push(handler);
    }

    pub fn off(&self, key: &str, handler: &AsyncHandler<T>) -> bool {
        let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(list) = handlers.get_mut(key) else {
            return false;
        };
        let before = list.len();
        list.retain(|h| !h.same_as(handler));
        let removed = list.len() < before;
        if list.is_empty() {
            handlers.remove(key);
        }
        removed
    }

    /// Start every handler registered under `key`; the returned future
    /// resolves once all of them have settled.
    pub fn emit(&self, key: &str, event: T) -> BoxFuture<'static, EmitReport> {
        let handlers = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
            .unwrap_or_default();
        Box::pin(settle_all(handlers, event, key.to_string()))
    }

    pub fn handler_count(&self, key: &str) -> usize {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(counter: &Arc<AtomicUsize>) -> Handler<u32> {
        let counter = Arc::clone(counter);
        Handler::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn emitter_isolates_errors_and_panics() {
        let emitter = Emitter::new("status");
        let counter = Arc::new(AtomicUsize::new(0));

        emitter.on(Handler::new(|_: &u32| anyhow::bail!("boom")));
        emitter.on(Handler::new(|_: &u32| panic!("handler exploded")));
        emitter.on(counting(&counter));

        let report = emitter.emit(&7);
        assert_eq!(report.invoked, 3);
        assert_eq!(report.failed, 2);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn emitter_allows_duplicates_and_off_removes_by_identity() {
        let emitter = Emitter::new("status");
        let counter = Arc::new(AtomicUsize::new(0));
        let handler = counting(&counter);

        emitter.on(handler.clone());
        emitter.on(handler.clone());
        emitter.emit(&1);
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        let stranger = counting(&counter);
        assert!(!emitter.off(&stranger));
        assert!(emitter.off(&handler));
        assert!(emitter.is_empty());
    }

    #[test]
    fn event_emitter_routes_by_key() {
        let emitter = EventEmitter::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let handler = counting(&counter);
        emitter.on("a", handler.clone());

        assert_eq!(emitter.emit("b", &1).invoked, 0);
        assert_eq!(emitter.emit("a", &1).invoked, 1);
        assert!(emitter.off("a", &handler));
        assert_eq!(emitter.handler_count("a"), 0);
    }

    #[tokio::test]
    async fn async_emitter_settles_all_handlers() {
        let emitter = AsyncEventEmitter::new();
        let counter = Arc::new(AtomicUsize::new(0));

        emitter.on(
            "tick",
            AsyncHandler::new(|_: u32| async { Err::<(), _>(anyhow::anyhow!("rejected")) }),
        );
        emitter.on(
            "tick",
            AsyncHandler::from_fn(|_: u32| -> anyhow::Result<()> { panic!("thrown") }),
        );
        let c = Arc::clone(&counter);
        emitter.on(
            "tick",
            AsyncHandler::new(move |n: u32| {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(n as usize, Ordering::SeqCst);
                    Ok(())
                }
            }),
        );

        let report = emitter.emit("tick", 5).await;
        assert_eq!(report.invoked, 3);
        assert_eq!(report.failed, 2);
        assert_eq!(report.succeeded(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn async_handler_identity_survives_clone() {
        let a = AsyncHandler::from_fn(|_: u32| Ok(()));
        let b = AsyncHandler::from_fn(|_: u32| Ok(()));
        assert!(a.same_as(&a.clone()));
        assert!(!a.same_as(&b));
    }
}
