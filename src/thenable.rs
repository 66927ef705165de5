//! What a promise can be resolved with, and the seam for other
//! implementations of the same primitive.
use crate::{Error, Promise, Reject, Resolve};
use std::fmt;

/// Anything that can report one outcome to a pair of capabilities.
///
/// Implement this to let a [`Promise`] adopt the outcome of a deferred value
/// from another library. `subscribe` runs on the adopting promise's queue;
/// returning `Err` rejects the adopting promise with that reason unless one
/// of the capabilities has already been called.
///
/// # Examples
///
/// ```
/// use thenable::{Error, MicrotaskQueue, Promise, Reject, Resolution, Resolve, Thenable};
///
/// struct Ready(u32);
///
/// impl Thenable<u32, Error> for Ready {
///     fn subscribe(self: Box<Self>, resolve: Resolve<u32, Error>, _: Reject<u32, Error>) -> Result<(), Error> {
///         resolve.resolve(self.0);
///         Ok(())
///     }
/// }
///
/// let queue = MicrotaskQueue::new();
/// let (promise, resolve, _reject) = Promise::<u32, Error>::pending(&queue);
/// resolve.resolve_with(Resolution::foreign(Ready(3)));
/// queue.run_until_idle();
/// assert_eq!(promise.outcome(), Some(Ok(3)));
/// ```
pub trait Thenable<T: 'static, E: 'static>: Send {
    fn subscribe(self: Box<Self>, resolve: Resolve<T, E>, reject: Reject<T, E>) -> Result<(), E>;

    /// The [`Promise`] behind this thenable, if it is one. Lets a promise
    /// resolved with itself through this seam be rejected instead of waiting
    /// on itself forever.
    fn as_promise(&self) -> Option<&Promise<T, E>> {
        None
    }
}

/// A candidate outcome for a successful settlement.
pub enum Resolution<T: 'static, E: 'static> {
    /// Fulfil with this value.
    Value(T),
    /// Adopt this promise's outcome. Resolving a promise with itself rejects
    /// it with [`Error::CyclicResolution`].
    Promise(Promise<T, E>),
    /// Adopt a foreign thenable's outcome.
    Foreign(Box<dyn Thenable<T, E>>),
}

impl<T, E> Resolution<T, E> {
    pub fn foreign(thenable: impl Thenable<T, E> + 'static) -> Self {
        Resolution::Foreign(Box::new(thenable))
    }
}

impl<T, E> From<Promise<T, E>> for Resolution<T, E> {
    fn from(promise: Promise<T, E>) -> Self {
        Resolution::Promise(promise)
    }
}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for Resolution<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Resolution::Promise(promise) => f.debug_tuple("Promise").field(promise).finish(),
            Resolution::Foreign(_) => f.write_str("Foreign(..)"),
        }
    }
}

/// String reasons carry the library error's message.
impl From<Error> for String {
    fn from(error: Error) -> Self {
        error.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::{Resolution, Thenable};
    use crate::{Error, MicrotaskQueue, Promise, Reject, Resolve};

    /// Calls both capabilities, then reports a failure anyway.
    struct Noisy;

    impl Thenable<i32, String> for Noisy {
        fn subscribe(
            self: Box<Self>,
            resolve: Resolve<i32, String>,
            reject: Reject<i32, String>,
        ) -> Result<(), String> {
            resolve.resolve(1);
            reject.reject("late".into());
            resolve.resolve(2);
            Err("thrown after settling".into())
        }
    }

    struct Broken;

    impl Thenable<i32, String> for Broken {
        fn subscribe(self: Box<Self>, _: Resolve<i32, String>, _: Reject<i32, String>) -> Result<(), String> {
            Err("no then".into())
        }
    }

    /// Resolves with another thenable `depth` times before producing a value.
    struct Nested(u32);

    impl Thenable<u32, Error> for Nested {
        fn subscribe(self: Box<Self>, resolve: Resolve<u32, Error>, _: Reject<u32, Error>) -> Result<(), Error> {
            match self.0 {
                0 => resolve.resolve(0),
                depth => resolve.resolve_with(Resolution::foreign(Nested(depth - 1))),
            }
            Ok(())
        }
    }

    #[test]
    fn test_first_thenable_callback_wins() {
        let queue = MicrotaskQueue::new();
        let (promise, resolve, _reject) = Promise::<i32, String>::pending(&queue);
        resolve.resolve_with(Resolution::foreign(Noisy));
        queue.run_until_idle();
        assert_eq!(promise.outcome(), Some(Ok(1)));
    }

    #[test]
    fn test_subscribe_error_rejects() {
        let queue = MicrotaskQueue::new();
        let (promise, resolve, _reject) = Promise::<i32, String>::pending(&queue);
        resolve.resolve_with(Resolution::foreign(Broken));
        queue.run_until_idle();
        assert_eq!(promise.outcome(), Some(Err("no then".to_string())));
    }

    #[test]
    fn test_nested_thenables_flatten() {
        let queue = MicrotaskQueue::new();
        let (promise, resolve, _reject) = Promise::<u32, Error>::pending(&queue);
        resolve.resolve_with(Resolution::foreign(Nested(10_000)));
        queue.run_until_idle();
        assert_eq!(promise.outcome(), Some(Ok(0)));
    }

    #[test]
    fn test_promise_is_a_thenable() {
        let queue = MicrotaskQueue::new();
        let source = Promise::<i32, Error>::resolved(&queue, 4);
        let (promise, resolve, _reject) = Promise::<i32, Error>::pending(&queue);
        resolve.resolve_with(Resolution::foreign(source));
        queue.run_until_idle();
        assert_eq!(promise.outcome(), Some(Ok(4)));
    }

    #[test]
    fn test_foreign_wrapping_itself_rejects() {
        let queue = MicrotaskQueue::new();
        let (promise, resolve, _reject) = Promise::<i32, Error>::pending(&queue);
        resolve.resolve_with(Resolution::foreign(promise.clone()));
        queue.run_until_idle();
        assert_eq!(promise.outcome(), Some(Err(Error::CyclicResolution)));
    }

    #[test]
    fn test_as_promise_defaults_to_none() {
        let queue = MicrotaskQueue::new();
        let promise = Promise::<i32, String>::resolved(&queue, 1);
        assert!(<Broken as Thenable<i32, String>>::as_promise(&Broken).is_none());
        let found = <Promise<i32, String> as Thenable<i32, String>>::as_promise(&promise)
            .expect("a promise is its own promise");
        assert!(Promise::ptr_eq(found, &promise));
    }

    #[test]
    fn test_string_reason_from_error() {
        assert_eq!(
            String::from(Error::Abandoned),
            "every settlement capability was dropped before the promise settled"
        );
    }
}
