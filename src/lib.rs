//! A pluggable, asynchronous key→binary-value datastore framework.
//!
//! The substance of this crate is the streaming I/O layer that sits
//! between a backend and its callers: canonical byte streams and object
//! channels ([`stream`], [`channel`]), a teeing wrapper that lets an
//! adapter observe a stream alongside its primary consumer ([`tee`]), and
//! the datastore/adapter composition contract ([`datastore`],
//! [`adapter`]). [`backends`] provides two trivial, in-process backends
//! used to exercise and test all of the above.

pub mod adapter;
pub mod backends;
pub mod channel;
pub mod datastore;
pub mod error;
pub mod key;
pub mod logging;
pub mod metadata;
pub mod stream;
pub mod testing;
pub mod tee;

pub use datastore::{Datastore, DatastoreId};
pub use error::{Error, Result};
pub use key::Key;
