use crate::capability::{capabilities, Reject, Resolve};
use crate::{Error, MicrotaskQueue, Resolution, State, Thenable};
use parking_lot::Mutex;
use std::cell::RefCell;
use std::fmt;
use std::future::{Future, IntoFuture};
use std::mem;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use tracing::{debug, trace};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Observers released by abandonment, waiting to be dropped by the
    /// outermost [`release`] call on this thread.
    static RELEASED: RefCell<Option<Vec<Box<dyn Send>>>> = const { RefCell::new(None) };
}

/// Drops released observers without recursing.
///
/// Dropping an observer drops the capabilities of its dependent promise,
/// which may abandon that promise and release its observers in turn. Nested
/// calls only append; the outermost call drains the list in a loop, so
/// abandoning a long chain uses constant stack.
fn release(observers: Box<dyn Send>) {
    let outermost = RELEASED.with(|cell| {
        let mut slot = cell.borrow_mut();
        match slot.as_mut() {
            Some(pending) => {
                pending.push(observers);
                None
            }
            None => {
                *slot = Some(vec![]);
                Some(observers)
            }
        }
    });
    let Some(first) = outermost else {
        return;
    };
    let _reset = ResetReleased;
    drop(first);
    while let Some(next) = RELEASED.with(|cell| cell.borrow_mut().as_mut().and_then(Vec::pop)) {
        drop(next);
    }
}

struct ResetReleased;

impl Drop for ResetReleased {
    fn drop(&mut self) {
        let leftover = RELEASED.with(|cell| cell.borrow_mut().take());
        drop(leftover);
    }
}

/// A value that is not there yet and settles at most once, to either a
/// value of type `T` or a reason of type `E`.
///
/// `Promise` is a handle: clones observe and settle the same state. Every
/// call to [`then`](Promise::then) (or one of its shorthands) creates a new
/// dependent promise whose outcome is driven by the callback's result.
///
/// # Examples
///
/// ```
/// use thenable::{Error, MicrotaskQueue, Promise, Resolution};
///
/// let queue = MicrotaskQueue::new();
/// let (source, resolve, _reject) = Promise::<String, Error>::pending(&queue);
/// let inner = source.clone();
/// let adopted = Promise::<u8, Error>::resolved(&queue, 7)
///     .and_then(move |_| Ok(Resolution::from(inner)));
///
/// resolve.resolve("🍓".into());
/// queue.run_until_idle();
/// assert_eq!(adopted.outcome(), Some(Ok("🍓".to_string())));
/// ```
pub struct Promise<T, E> {
    shared: Arc<Shared<T, E>>,
}

struct Shared<T, E> {
    id: u64,
    queue: MicrotaskQueue,
    inner: Mutex<Inner<T, E>>,
}

struct Inner<T, E> {
    outcome: Option<Result<T, E>>,
    /// Notifications waiting for settlement, in registration order.
    observers: Vec<Observer<T, E>>,
    wakers: Vec<Waker>,
    /// Live settlement capabilities. Zero while pending means nothing can
    /// settle this promise any more.
    producers: usize,
}

pub(crate) type Observer<T, E> = Box<dyn FnOnce(Result<T, E>) + Send + 'static>;

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: 'static, E: 'static> Promise<T, E> {
    /// Whether both handles refer to the same promise.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.shared, &b.shared)
    }

    /// The queue observers of this promise are notified on.
    pub fn queue(&self) -> &MicrotaskQueue {
        &self.shared.queue
    }

    pub fn state(&self) -> State {
        match self.shared.inner.lock().outcome {
            None => State::Pending,
            Some(Ok(_)) => State::Fulfilled,
            Some(Err(_)) => State::Rejected,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state() == State::Pending
    }

    pub fn is_settled(&self) -> bool {
        self.state().is_settled()
    }

    pub(crate) fn add_producer(&self) {
        self.shared.inner.lock().producers += 1;
    }

    /// If this was the last capability of a pending promise, release its
    /// observers and wake its waiters.
    pub(crate) fn release_producer(&self) {
        let (observers, wakers) = {
            let mut inner = self.shared.inner.lock();
            inner.producers -= 1;
            if inner.producers > 0 || inner.outcome.is_some() {
                return;
            }
            (
                mem::take(&mut inner.observers),
                mem::take(&mut inner.wakers),
            )
        };
        debug!(
            promise = self.shared.id,
            released = observers.len(),
            "promise abandoned while pending"
        );
        for waker in wakers {
            waker.wake()
        }
        release(Box::new(observers));
    }
}

impl<T, E> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + From<Error> + Send + 'static,
{
    /// Creates a promise and synchronously runs `setup` with its two
    /// settlement capabilities. The first capability call wins. If `setup`
    /// returns `Err`, the promise is rejected with that reason unless it has
    /// already been settled.
    ///
    /// # Examples
    ///
    /// ```
    /// use thenable::{Error, MicrotaskQueue, Promise, State};
    ///
    /// let queue = MicrotaskQueue::new();
    /// let promise = Promise::<&str, String>::new(&queue, |resolve, reject| {
    ///     resolve.resolve("value");
    ///     reject.reject("reason".into());
    ///     Ok(())
    /// });
    /// assert_eq!(promise.state(), State::Fulfilled);
    /// assert_eq!(promise.outcome(), Some(Ok("value")));
    ///
    /// let failed = Promise::<(), Error>::new(&queue, |_resolve, _reject| {
    ///     Err(Error::Abandoned)
    /// });
    /// assert_eq!(failed.outcome(), Some(Err(Error::Abandoned)));
    /// ```
    pub fn new<S>(queue: &MicrotaskQueue, setup: S) -> Self
    where
        S: FnOnce(Resolve<T, E>, Reject<T, E>) -> Result<(), E>,
    {
        let (promise, resolve, reject) = Self::pending(queue);
        let guard = reject.clone();
        if let Err(reason) = setup(resolve, reject) {
            debug!(promise = promise.shared.id, "setup failed");
            guard.reject(reason);
        }
        promise
    }

    /// Creates a pending promise and hands its capabilities to the caller.
    pub fn pending(queue: &MicrotaskQueue) -> (Self, Resolve<T, E>, Reject<T, E>) {
        let promise = Self {
            shared: Arc::new(Shared {
                id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
                queue: queue.clone(),
                inner: Mutex::new(Inner {
                    outcome: None,
                    observers: vec![],
                    wakers: vec![],
                    producers: 0,
                }),
            }),
        };
        let (resolve, reject) = capabilities(&promise);
        (promise, resolve, reject)
    }

    pub fn resolved(queue: &MicrotaskQueue, value: T) -> Self {
        let (promise, resolve, _) = Self::pending(queue);
        resolve.resolve(value);
        promise
    }

    pub fn rejected(queue: &MicrotaskQueue, reason: E) -> Self {
        let (promise, _, reject) = Self::pending(queue);
        reject.reject(reason);
        promise
    }

    /// The settled outcome, or `None` while pending.
    pub fn outcome(&self) -> Option<Result<T, E>> {
        self.shared.inner.lock().outcome.clone()
    }

    /// Registers a pair of callbacks and returns the promise that their
    /// result settles.
    ///
    /// Exactly one of the callbacks runs, on this promise's queue, once this
    /// promise has settled. `Ok` resolves the returned promise (adopting it
    /// if it is itself a promise or thenable); `Err` rejects it.
    pub fn then<U, F, R>(&self, on_fulfilled: F, on_rejected: R) -> Promise<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<Resolution<U, E>, E> + Send + 'static,
        R: FnOnce(E) -> Result<Resolution<U, E>, E> + Send + 'static,
    {
        let (dependent, resolve, reject) = Promise::pending(self.queue());
        self.register(Box::new(move |outcome| {
            let result = match outcome {
                Ok(value) => on_fulfilled(value),
                Err(reason) => on_rejected(reason),
            };
            match result {
                Ok(resolution) => resolve.resolve_with(resolution),
                Err(reason) => reject.reject(reason),
            }
        }));
        dependent
    }

    /// [`then`](Promise::then) without a rejection callback: a rejection
    /// passes through to the returned promise unchanged.
    pub fn and_then<U, F>(&self, on_fulfilled: F) -> Promise<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<Resolution<U, E>, E> + Send + 'static,
    {
        self.then(on_fulfilled, Err)
    }

    /// [`then`](Promise::then) without a fulfillment callback: a value
    /// passes through to the returned promise unchanged.
    pub fn catch<R>(&self, on_rejected: R) -> Promise<T, E>
    where
        R: FnOnce(E) -> Result<Resolution<T, E>, E> + Send + 'static,
    {
        self.then(|value| Ok(Resolution::Value(value)), on_rejected)
    }

    /// Like [`and_then`](Promise::and_then) for callbacks producing plain values.
    pub fn map<U, F>(&self, f: F) -> Promise<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<U, E> + Send + 'static,
    {
        self.and_then(move |value| f(value).map(Resolution::Value))
    }

    /// A future that completes with this promise's outcome.
    pub fn waiter(&self) -> Waiter<T, E> {
        Waiter {
            promise: self.clone(),
        }
    }

    /// Queues `observer` behind the ones already registered, or right away
    /// if this promise has settled.
    pub(crate) fn register(&self, observer: Observer<T, E>) {
        let mut inner = self.shared.inner.lock();
        let settled = inner.outcome.clone();
        if let Some(outcome) = settled {
            // Pushed under our lock so a racing settlement cannot reorder it.
            self.shared
                .queue
                .push(Box::new(move || observer(outcome)));
        } else if inner.producers == 0 {
            drop(inner);
            trace!(promise = self.shared.id, "observer dropped on abandoned promise");
            release(Box::new(observer));
        } else {
            inner.observers.push(observer);
        }
    }

    /// Records the outcome and queues every registered observer in order.
    pub(crate) fn settle(&self, outcome: Result<T, E>) {
        let wakers = {
            let mut inner = self.shared.inner.lock();
            if inner.outcome.is_some() {
                trace!(promise = self.shared.id, "already settled");
                return;
            }
            let observers = mem::take(&mut inner.observers);
            debug!(
                promise = self.shared.id,
                fulfilled = outcome.is_ok(),
                observers = observers.len(),
                "promise settled"
            );
            for observer in observers {
                let outcome = outcome.clone();
                self.shared
                    .queue
                    .push(Box::new(move || observer(outcome)));
            }
            inner.outcome = Some(outcome);
            mem::take(&mut inner.wakers)
        };
        for waker in wakers {
            waker.wake()
        }
    }
}

impl<T, E> Thenable<T, E> for Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + From<Error> + Send + 'static,
{
    fn subscribe(self: Box<Self>, resolve: Resolve<T, E>, reject: Reject<T, E>) -> Result<(), E> {
        self.register(Box::new(move |outcome| match outcome {
            Ok(value) => resolve.resolve(value),
            Err(reason) => reject.reject(reason),
        }));
        Ok(())
    }

    fn as_promise(&self) -> Option<&Promise<T, E>> {
        Some(self)
    }
}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("Promise")
            .field("id", &self.shared.id)
            .field("outcome", &inner.outcome)
            .field("observers", &inner.observers.len())
            .finish()
    }
}

/// Completes with the outcome of a [`Promise`], without going through its
/// queue. Resolves to `Err(Error::Abandoned.into())` if the promise can no
/// longer settle.
///
/// # Examples
///
/// ```
/// use thenable::{Error, MicrotaskQueue, Promise};
/// use futures::executor::block_on;
/// use std::thread;
///
/// let queue = MicrotaskQueue::new();
/// let (promise, resolve, _reject) = Promise::<String, Error>::pending(&queue);
/// let task = thread::spawn(move || block_on(promise.waiter()));
/// resolve.resolve("Hi".into());
/// assert_eq!(task.join().expect("waiter thread panicked"), Ok("Hi".into()));
/// ```
pub struct Waiter<T, E> {
    promise: Promise<T, E>,
}

impl<T, E> Future for Waiter<T, E>
where
    T: Clone,
    E: Clone + From<Error>,
{
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut inner = self.promise.shared.inner.lock();
        let settled = inner.outcome.clone();
        if let Some(outcome) = settled {
            return Poll::Ready(outcome);
        }
        if inner.producers == 0 {
            return Poll::Ready(Err(E::from(Error::Abandoned)));
        }
        if !inner.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            inner.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

impl<T, E> IntoFuture for Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + From<Error> + Send + 'static,
{
    type Output = Result<T, E>;
    type IntoFuture = Waiter<T, E>;

    fn into_future(self) -> Self::IntoFuture {
        Waiter { promise: self }
    }
}
