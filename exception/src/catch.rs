//! Turning panics into [`Error`] values.
//!
//! Host code that drives a JavaScript context may panic anywhere: a failed
//! lookup, a poisoned lock, or a deliberate [`throw`] of a JavaScript value.
//! The guards in this module stop such a panic at a chosen boundary and hand
//! the caller an ordinary [`Error`] instead.
//!
//! ```ignore
//! let value = exception::run_and_catch(|| compute())?;
//! ```

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use quickjs_rusty::{ExecutionError, OwnedJsValue, ValueError};

use crate::{Error, JsError};

/// Payload carried by an unwinding panic.
pub type Payload = Box<dyn Any + Send>;

/// The shape of a recovered panic payload, in the order it is checked.
#[derive(Debug)]
pub enum Recovered {
    /// The payload already was an error.
    Error(Error),
    /// A raw JavaScript value thrown by the host.
    Host(OwnedJsValue),
    Message(String),
    Other(Payload),
}

impl Recovered {
    pub fn from_payload(payload: Payload) -> Self {
        take::<Error>(payload)
            .map(Self::Error)
            .or_else(|p| take::<JsError>(p).map(|err| Self::Error(err.into())))
            .or_else(|p| take::<ExecutionError>(p).map(|err| Self::Error(err.into())))
            .or_else(|p| take::<ValueError>(p).map(|err| Self::Error(err.into())))
            .or_else(|p| take::<anyhow::Error>(p).map(|err| Self::Error(err.into())))
            .or_else(|p| {
                take::<Box<dyn std::error::Error + Send + Sync>>(p)
                    .map(|err| Self::Error(Error::Other(anyhow::anyhow!(err))))
            })
            .or_else(|p| take::<OwnedJsValue>(p).map(Self::Host))
            .or_else(|p| take::<&'static str>(p).map(|msg| Self::Message(msg.to_string())))
            .or_else(|p| take::<String>(p).map(Self::Message))
            .unwrap_or_else(Self::Other)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Error(_) => "error",
            Self::Host(_) => "host value",
            Self::Message(_) => "message",
            Self::Other(_) => "other",
        }
    }
}

impl From<Recovered> for Error {
    fn from(recovered: Recovered) -> Self {
        match recovered {
            Recovered::Error(err) => err,
            Recovered::Host(value) => Error::Js(JsError::new(value)),
            Recovered::Message(msg) => Error::Panic(msg),
            Recovered::Other(payload) => Error::Panic(describe(&*payload)),
        }
    }
}

fn take<T: 'static>(payload: Payload) -> Result<T, Payload> {
    payload.downcast::<T>().map(|value| *value)
}

macro_rules! describe_as {
    ($payload:expr, $($ty:ty),+ $(,)?) => {
        $(
            if let Some(value) = $payload.downcast_ref::<$ty>() {
                return format!("{value:?}");
            }
        )+
    };
}

/// Best-effort rendering of a payload whose type is not known up front.
fn describe(payload: &(dyn Any + Send)) -> String {
    if let Some(value) = payload.downcast_ref::<serde_json::Value>() {
        return value.to_string();
    }

    describe_as!(
        payload, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64, bool,
        char, (),
    );

    format!("{payload:?}")
}

/// Converts a value captured by [`std::panic::catch_unwind`] into an [`Error`].
///
/// `None` means nothing panicked and yields `None`. Every payload maps to
/// exactly one error:
///
/// 1. errors are returned as they are;
/// 2. JavaScript values become [`Error::Js`] with the value untouched;
/// 3. string messages become [`Error::Panic`] with that message;
/// 4. anything else becomes [`Error::Panic`] with a formatted description.
pub fn handle_recovery(payload: Option<Payload>) -> Option<Error> {
    payload.map(|payload| Recovered::from_payload(payload).into())
}

fn recover(payload: Payload) -> Error {
    let recovered = Recovered::from_payload(payload);
    log::debug!("recovered panic ({})", recovered.kind());
    recovered.into()
}

/// Runs `f`, turning a panic into `Err`.
///
/// `f` is treated as unwind safe: state it touched before panicking is left
/// as it was.
pub fn run_and_catch<T>(f: impl FnOnce() -> T) -> Result<T, Error> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(recover)
}

/// [`run_and_catch`] for calls that already report failure through a `Result`.
pub fn try_run_and_catch<T, E>(f: impl FnOnce() -> Result<T, E>) -> Result<T, Error>
where
    E: Into<Error>,
{
    run_and_catch(f).and_then(|res| res.map_err(Into::into))
}

/// Something a recovered error can be written into.
pub trait ErrorSlot {
    fn set_error(&mut self, err: Error);
}

impl ErrorSlot for Option<Error> {
    fn set_error(&mut self, err: Error) {
        *self = Some(err);
    }
}

impl<T> ErrorSlot for Result<T, Error> {
    fn set_error(&mut self, err: Error) {
        *self = Err(err);
    }
}

/// Runs `body` with `slot`, overwriting the slot with the recovered error if
/// `body` panics.
///
/// Without a panic the slot keeps whatever `body` left in it. Everything
/// `body` owns has been dropped by the time the slot is written.
pub fn catch<S, F>(slot: &mut S, body: F)
where
    S: ErrorSlot,
    F: FnOnce(&mut S),
{
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| body(&mut *slot))) {
        slot.set_error(recover(payload));
    }
}

/// Like [`catch`], but passes the recovered error to `handler`.
///
/// Returns `None` when `body` panicked.
pub fn catch_handler<T, H, F>(handler: H, body: F) -> Option<T>
where
    H: FnOnce(Error),
    F: FnOnce() -> T,
{
    match run_and_catch(body) {
        Ok(value) => Some(value),
        Err(err) => {
            handler(err);
            None
        }
    }
}

/// Raises a JavaScript value as a panic, to be recovered by one of the guards.
pub fn throw(value: OwnedJsValue) -> ! {
    panic::panic_any(value)
}

/// Raises an error as a panic; guards return it unchanged.
pub fn throw_error(err: impl Into<Error>) -> ! {
    panic::panic_any(err.into())
}

pub trait ThrowExt<T> {
    /// Unwraps the value or raises the failure as a panic.
    fn or_throw(self) -> T;
}

impl<T> ThrowExt<T> for Result<T, ExecutionError> {
    fn or_throw(self) -> T {
        match self {
            Ok(value) => value,
            Err(ExecutionError::Exception(value)) => throw(value),
            Err(err) => panic::panic_any(err),
        }
    }
}

impl<T> ThrowExt<T> for Result<T, Error> {
    fn or_throw(self) -> T {
        match self {
            Ok(value) => value,
            Err(err) => panic::panic_any(err),
        }
    }
}
