//! A shared conformance suite exercising the properties every real backend
//! is expected to satisfy. Individual backends call this from their own
//! `#[cfg(test)]` modules instead of re-deriving the same checks; the
//! `conformance` binary calls it too, against a backend picked on the
//! command line.

use crate::datastore::Datastore;
use crate::error::Error;
use crate::key::Key;
use crate::stream::Source;
use bytes::Bytes;

/// Round-trip, not-found-after-delete, contains-fidelity, and stat-size
/// fidelity against a fresh namespace of `ds`.
///
/// Only exercises backends that actually persist what's written — it is
/// not meaningful to run against [`crate::backends::NullDatastore`].
pub async fn datastore_conformance(ds: &dyn Datastore) {
    let key = Key::new("/conformance/roundtrip");
    let value = Bytes::from_static(b"the quick brown fox");

    ds.put(&key, Source::Buffer(value.clone())).await.unwrap();

    let got = ds.get_all(&key).await.unwrap();
    assert_eq!(got, value, "round-trip must preserve exact bytes");

    assert!(ds.contains(&key).await.unwrap(), "contains must agree with get");

    let stat = ds.stat(&key).await.unwrap();
    if let Some(size) = stat.size {
        assert_eq!(size, value.len() as u64, "reported size must match actual length");
    }

    ds.delete(&key).await.unwrap();
    assert!(!ds.contains(&key).await.unwrap(), "contains must be false after delete");
    assert!(
        matches!(ds.get(&key).await, Err(Error::NotFound)),
        "get must fail with NotFound after delete"
    );
    assert!(
        matches!(ds.delete(&key).await, Err(Error::NotFound)),
        "deleting an already-absent key must fail with NotFound"
    );
}

/// A value supplied as many empty chunks interleaved with
/// non-empty ones round-trips to exactly the concatenation of the
/// non-empty chunks.
pub async fn empty_chunk_transparency(ds: &dyn Datastore) {
    let key = Key::new("/conformance/empty-chunks");
    let chunks = vec![
        Bytes::new(),
        Bytes::from_static(b"a"),
        Bytes::new(),
        Bytes::new(),
        Bytes::from_static(b"b"),
        Bytes::new(),
    ];
    ds.put(&key, Source::from_vec(chunks)).await.unwrap();
    assert_eq!(ds.get_all(&key).await.unwrap(), Bytes::from_static(b"ab"));
    ds.delete(&key).await.unwrap();
}
