//! A small CLI that runs the shared conformance suite against a chosen
//! backend — a manual/CI smoke test, not a substitute for the crate's own
//! `#[cfg(test)]` coverage.

use clap::Parser;
use datastore::backends::{DictDatastore, NullDatastore};
use datastore::logging::{init_logging, LogArgs};
use datastore::testing::{datastore_conformance, empty_chunk_transparency};
use datastore::{Datastore, Key};

#[derive(Parser, Debug)]
struct Args {
    /// Which trivial backend to exercise.
    #[arg(long, value_enum, default_value_t = Backend::Dict)]
    backend: Backend,

    #[command(flatten)]
    log: LogArgs,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum Backend {
    Null,
    Dict,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(&args.log);

    match args.backend {
        Backend::Dict => {
            let ds = DictDatastore::new();
            tracing::info!("running conformance suite against DictDatastore");
            datastore_conformance(&ds).await;
            empty_chunk_transparency(&ds).await;
        }
        Backend::Null => {
            // NullDatastore intentionally discards everything, so the
            // round-trip properties don't apply to it; just exercise that
            // its documented always-absent behavior holds.
            let ds = NullDatastore::new();
            tracing::info!("running smoke checks against NullDatastore");
            let key = Key::new("/conformance/null");
            ds.put(&key, datastore::stream::Source::Buffer(bytes::Bytes::from_static(b"x")))
                .await
                .unwrap();
            assert!(!ds.contains(&key).await.unwrap());
            assert!(matches!(
                ds.get(&key).await,
                Err(datastore::Error::NotFound)
            ));
        }
    }

    tracing::info!("conformance checks passed");
}
