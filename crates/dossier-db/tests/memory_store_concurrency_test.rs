//! Claim exclusivity of the memory store under concurrent callers.

use std::collections::HashSet;
use std::sync::Arc;

use dossier_db::{JobRepository, MemoryStore, NewJob};
use futures::future::join_all;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_never_share_a_job() {
    let store = Arc::new(MemoryStore::new());
    for i in 0..50u8 {
        store.enqueue(NewJob::new("t", vec![i])).await.unwrap();
    }

    let claims = join_all((0..8).map(|_| {
        let store = store.clone();
        tokio::spawn(async move {
            let mut mine = Vec::new();
            while let Some(job) = store.fetch_next_eligible().await.unwrap() {
                mine.push(job.id);
            }
            mine
        })
    }))
    .await;

    let all: Vec<_> = claims.into_iter().flat_map(|r| r.unwrap()).collect();
    let unique: HashSet<_> = all.iter().collect();
    assert_eq!(all.len(), 50);
    assert_eq!(unique.len(), 50);
}
