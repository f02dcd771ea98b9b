//! Image reference parsing and read-only metadata inspection for OCI
//! compliant registries
#![cfg_attr(not(test), deny(missing_docs))]

pub mod client;
pub mod errors;
pub mod manifest;
mod reference;
pub mod secrets;

mod token_cache;

#[doc(inline)]
pub use client::Client;
#[doc(inline)]
pub use reference::{ImageRef, ParseError, DEFAULT_REGISTRY};
