//! Contract Test: Shutdown Determinism
//!
//! Constraints verified:
//! - `shutdown()` returns only after the compile in flight has committed
//! - No compile runs after `shutdown()`
//! - Cancelling a compile at any point never leaves an IP list present
//!   only as its `.old` backup
//!
//! If this test fails, stopping the daemon can leave the run directory
//! without a live allow-list or subscriber list.

mod common;

use common::*;
use pfgate_core::config::EngineConfig;
use pfgate_core::engine::PolicyEngine;
use pfgate_core::error::Error;
use pfgate_core::model::RemoteState;
use pfgate_core::store::{FileArtifactStore, MemoryArtifactStore};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

async fn file_engine(dir: &Path, source: &MockStateSource) -> Arc<PolicyEngine> {
    let store = FileArtifactStore::new(dir).await.unwrap();
    let (engine, _rx) = PolicyEngine::new(
        Box::new(MockStateSource::sharing_counters_with(source)),
        Box::new(store),
        two_interface_config(),
        dir,
        EngineConfig::default(),
    )
    .expect("engine construction succeeds");
    Arc::new(engine)
}

#[tokio::test]
async fn shutdown_waits_for_in_flight_compile() {
    let source =
        MockStateSource::new(single_subscriber_state()).with_delay(Duration::from_millis(50));
    let store = MemoryArtifactStore::new();
    let (engine, _rx) = PolicyEngine::new(
        Box::new(MockStateSource::sharing_counters_with(&source)),
        Box::new(store.clone()),
        two_interface_config(),
        "/var/run/pfgate",
        EngineConfig::default(),
    )
    .expect("engine construction succeeds");
    let engine = Arc::new(engine);

    let running = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.compile().await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    engine.shutdown().await;
    assert_eq!(store.commit_count(), 1);
    assert!(running.await.unwrap().is_ok());

    assert!(matches!(engine.compile().await, Err(Error::ShuttingDown)));
    assert_eq!(source.fetch_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelled_compile_never_strands_a_list_as_backup() {
    let dir = tempdir().unwrap();
    let source = MockStateSource::new(single_subscriber_state());
    file_engine(dir.path(), &source)
        .await
        .compile()
        .await
        .unwrap();

    for round in 0..200u64 {
        source.set_state(RemoteState {
            subs: vec![subscriber(
                "aa:bb:cc:dd:ee:01",
                &format!("10.10.1.{}", round % 250 + 1),
                10,
                5,
            )],
            ..Default::default()
        });

        let engine = file_engine(dir.path(), &source).await;
        let compile = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move { engine.compile().await }
        });
        tokio::time::sleep(Duration::from_micros(50 + (round * 37) % 1000)).await;
        compile.abort();
        let _ = compile.await;

        // A commit that had started is finished once shutdown returns
        engine.shutdown().await;

        for list in ["allowed.txt", "subsexpr.txt", "pf.conf"] {
            assert!(
                dir.path().join(list).exists(),
                "{} missing after cancellation in round {}",
                list,
                round
            );
        }
    }
}
