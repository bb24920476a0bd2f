#![allow(unreachable_pub)]

mod error;
mod message;

pub use error::{ErrorKind, SubmitError};
pub use message::Message;

/// The pigeon `Result` type
pub type Result<T> = std::result::Result<T, crate::ErrorKind>;
