//! Access to the remote data store.

mod client;
mod error;
mod transport;

pub use client::{NetworkClient, RequestOptions, RetryPolicy};
pub use error::{ErrorClass, NetworkError};
pub use transport::{ApiRequest, HttpTransport, Transport};
