//! Settlement capabilities and the resolution procedure.
//!
//! A [`Resolve`]/[`Reject`] pair shares one latch: whichever is called first
//! takes effect, every later call on either is ignored.
use crate::{Error, Promise, Resolution};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

struct Capability<T: 'static, E: 'static> {
    promise: Promise<T, E>,
    latch: Arc<AtomicBool>,
}

impl<T: 'static, E: 'static> Capability<T, E> {
    fn new(promise: Promise<T, E>, latch: Arc<AtomicBool>) -> Self {
        promise.add_producer();
        Self { promise, latch }
    }

    /// `true` for exactly one call across every capability sharing the latch.
    fn trip(&self) -> bool {
        let first = !self.latch.swap(true, Ordering::AcqRel);
        if !first {
            trace!("settlement ignored; already settled through this latch");
        }
        first
    }
}

impl<T: 'static, E: 'static> Clone for Capability<T, E> {
    fn clone(&self) -> Self {
        Self::new(self.promise.clone(), self.latch.clone())
    }
}

impl<T: 'static, E: 'static> Drop for Capability<T, E> {
    fn drop(&mut self) {
        self.promise.release_producer();
    }
}

/// Settles a promise successfully. Handed out by [`Promise::new`] and
/// [`Promise::pending`], and to [`Thenable`](crate::Thenable)s being adopted.
pub struct Resolve<T: 'static, E: 'static> {
    capability: Capability<T, E>,
}

/// Settles a promise as rejected. Shares its latch with the matching
/// [`Resolve`].
pub struct Reject<T: 'static, E: 'static> {
    capability: Capability<T, E>,
}

pub(crate) fn capabilities<T: 'static, E: 'static>(promise: &Promise<T, E>) -> (Resolve<T, E>, Reject<T, E>) {
    let latch = Arc::new(AtomicBool::new(false));
    (
        Resolve {
            capability: Capability::new(promise.clone(), latch.clone()),
        },
        Reject {
            capability: Capability::new(promise.clone(), latch),
        },
    )
}

impl<T, E> Resolve<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + From<Error> + Send + 'static,
{
    pub fn resolve(&self, value: T) {
        self.resolve_with(Resolution::Value(value))
    }

    /// Resolves with a value, or adopts the eventual outcome of a promise or
    /// thenable.
    pub fn resolve_with(&self, resolution: Resolution<T, E>) {
        if self.capability.trip() {
            resolve_promise(&self.capability.promise, resolution);
        }
    }
}

impl<T, E> Reject<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + From<Error> + Send + 'static,
{
    /// Rejects with `reason` as is. A reason is never unwrapped.
    pub fn reject(&self, reason: E) {
        if self.capability.trip() {
            self.capability.promise.settle(Err(reason));
        }
    }
}

impl<T: 'static, E: 'static> Clone for Resolve<T, E> {
    fn clone(&self) -> Self {
        Self {
            capability: self.capability.clone(),
        }
    }
}

impl<T: 'static, E: 'static> Clone for Reject<T, E> {
    fn clone(&self) -> Self {
        Self {
            capability: self.capability.clone(),
        }
    }
}

impl<T: 'static, E: 'static> fmt::Debug for Resolve<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolve")
            .field("spent", &self.capability.latch.load(Ordering::Acquire))
            .finish()
    }
}

impl<T: 'static, E: 'static> fmt::Debug for Reject<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reject")
            .field("spent", &self.capability.latch.load(Ordering::Acquire))
            .finish()
    }
}

/// Settles `target` from `resolution`, following promises and thenables
/// until a plain value turns up.
fn resolve_promise<T, E>(target: &Promise<T, E>, resolution: Resolution<T, E>)
where
    T: Clone + Send + 'static,
    E: Clone + From<Error> + Send + 'static,
{
    match resolution {
        Resolution::Value(value) => target.settle(Ok(value)),
        Resolution::Promise(source) if Promise::ptr_eq(target, &source) => {
            debug!("promise resolved with itself");
            target.settle(Err(E::from(Error::CyclicResolution)));
        }
        Resolution::Foreign(thenable)
            if thenable
                .as_promise()
                .is_some_and(|source| Promise::ptr_eq(target, source)) =>
        {
            debug!("promise resolved with itself through a thenable");
            target.settle(Err(E::from(Error::CyclicResolution)));
        }
        Resolution::Promise(source) => {
            let (resolve, reject) = capabilities(target);
            source.register(Box::new(move |outcome| match outcome {
                Ok(value) => resolve.resolve(value),
                Err(reason) => reject.reject(reason),
            }));
        }
        Resolution::Foreign(thenable) => {
            let (resolve, reject) = capabilities(target);
            // Subscribing is deferred so nested thenables unwrap one job at a
            // time instead of recursing on the stack.
            target.queue().push(Box::new(move || {
                let fallback = reject.clone();
                if let Err(reason) = thenable.subscribe(resolve, reject) {
                    debug!("thenable failed to subscribe");
                    fallback.reject(reason);
                }
            }));
        }
    }
}
