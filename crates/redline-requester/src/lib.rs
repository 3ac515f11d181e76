//! Concrete model providers for the redline pipeline.

#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "http")]
pub mod sse;

#[cfg(feature = "http")]
pub use http::{HttpConfig, HttpRequester};
