//! Trivial in-process backends, kept here mainly as conformance fixtures
//! for the rest of the crate.

mod dict;
mod null;

pub use dict::DictDatastore;
pub use null::NullDatastore;
