//! 记忆账本集成测试：磁盘缓存、并发追加、锚定失败、环检测、回填

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use autobee::core::RetryConfig;
    use autobee::ledger::{
        BackfillStop, ContentStore, InMemoryChain, InMemoryContentStore, LedgerError, LedgerOptions, MemoryLedger,
        MemoryRecord, RecordCache, RecordQuery, SchnorrSigner, Signer, UploadOptions,
    };
    use serde_json::json;

    struct Harness {
        signer: Arc<SchnorrSigner>,
        store: Arc<InMemoryContentStore>,
        chain: Arc<InMemoryChain>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                signer: Arc::new(SchnorrSigner::from_secret_bytes(&[0x42; 32]).unwrap()),
                store: Arc::new(InMemoryContentStore::new()),
                chain: Arc::new(InMemoryChain::new()),
            }
        }

        fn options() -> LedgerOptions {
            LedgerOptions {
                retry: RetryConfig::immediate(3),
                ..Default::default()
            }
        }

        fn ledger(&self, cache: Arc<RecordCache>) -> MemoryLedger {
            MemoryLedger::new(
                self.signer.clone(),
                self.store.clone(),
                self.chain.clone(),
                cache,
                Self::options(),
            )
        }

        async fn open(&self, cache: Arc<RecordCache>) -> MemoryLedger {
            let (ledger, _) = MemoryLedger::open(
                self.signer.clone(),
                self.store.clone(),
                self.chain.clone(),
                cache,
                Self::options(),
            )
            .await
            .unwrap();
            ledger
        }
    }

    #[tokio::test]
    async fn test_append_chain_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("ledger.sqlite");
        let h = Harness::new();

        let (first, second) = {
            let ledger = h.open(Arc::new(RecordCache::open(&path).unwrap())).await;
            let first = ledger.append(json!({"note": "x"})).await.unwrap();
            let second = ledger.append(json!({"note": "y"})).await.unwrap();
            (first, second)
        };
        assert_eq!(first.previous_cid, "");
        assert_eq!(second.previous_cid, first.cid);

        let (ledger, bootstrap) = MemoryLedger::open(
            h.signer.clone(),
            h.store.clone(),
            h.chain.clone(),
            Arc::new(RecordCache::open(&path).unwrap()),
            Harness::options(),
        )
        .await
        .unwrap();
        assert!(!bootstrap.pointer_mismatch);
        assert_eq!(bootstrap.head_cid.as_deref(), Some(second.cid.as_str()));
        assert_eq!(bootstrap.anchor.last_nonce, Some(1));

        let third = ledger.append(json!({"note": "z"})).await.unwrap();
        assert_eq!(third.previous_cid, second.cid);
        assert_eq!(third.nonce, 2);

        let report = ledger.verify_chain(ledger.identity()).await.unwrap();
        assert!(report.consistent, "{:?}", report.details);
        assert_eq!(report.depth, 3);
        assert!(report.reached_genesis);
    }

    #[tokio::test]
    async fn test_concurrent_appends_use_distinct_increasing_nonces() {
        let h = Harness::new();
        let ledger = h.ledger(Arc::new(RecordCache::open_in_memory().unwrap()));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let ledger = ledger.clone();
                tokio::spawn(async move { ledger.append(json!({ "task": i })).await })
            })
            .collect();
        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap().unwrap());
        }

        let nonces: HashSet<u64> = outcomes.iter().map(|o| o.nonce).collect();
        assert_eq!(nonces, (0..8).collect::<HashSet<u64>>());

        let submitted: Vec<u64> = h
            .chain
            .submissions(ledger.identity())
            .await
            .iter()
            .map(|s| s.nonce)
            .collect();
        assert_eq!(submitted, (0..8).collect::<Vec<u64>>());

        // 串行化后链保持线性
        let previous: HashSet<&str> = outcomes.iter().map(|o| o.previous_cid.as_str()).collect();
        assert_eq!(previous.len(), 8);
        let report = ledger.verify_chain(ledger.identity()).await.unwrap();
        assert!(report.consistent, "{:?}", report.details);
        assert_eq!(report.depth, 8);
    }

    #[tokio::test]
    async fn test_exhausted_anchor_reports_failure_and_divergence() {
        let h = Harness::new();
        let ledger = h.ledger(Arc::new(RecordCache::open_in_memory().unwrap()));
        let first = ledger.append(json!({"note": "x"})).await.unwrap();

        h.chain.fail_next_submits(3);
        let err = ledger.append(json!({"note": "y"})).await.unwrap_err();
        let orphan = match err {
            LedgerError::AnchorFailure { cid, .. } => cid,
            other => panic!("unexpected error: {other}"),
        };
        assert_ne!(orphan, first.cid);
        assert_eq!(h.store.len().await, 2);

        let report = ledger.verify_chain(ledger.identity()).await.unwrap();
        assert!(!report.consistent);
        assert!(report.details.iter().any(|d| d.contains("anchored digest")));

        // 失败的锚定不消耗 nonce
        let next = ledger.append(json!({"note": "z"})).await.unwrap();
        assert_eq!(next.nonce, 1);
        assert_eq!(next.previous_cid, orphan);
    }

    #[tokio::test]
    async fn test_cyclic_chain_is_corrupt() {
        let h = Harness::new();
        let cache = Arc::new(RecordCache::open_in_memory().unwrap());
        let ledger = h.ledger(cache.clone());

        let a = MemoryRecord::unsigned(json!({"n": "a"}), "bafkcycleb", "2024-01-01T00:00:00Z", "test");
        let b = MemoryRecord::unsigned(json!({"n": "b"}), "bafkcyclea", "2024-01-01T00:00:01Z", "test");
        h.store.insert_raw("bafkcyclea", a.to_upload_bytes().unwrap()).await;
        h.store.insert_raw("bafkcycleb", b.to_upload_bytes().unwrap()).await;
        cache.set_last_cid(ledger.identity(), "bafkcyclea").unwrap();

        let err = ledger.verify_chain(ledger.identity()).await.unwrap_err();
        assert!(matches!(err, LedgerError::CorruptChain(_)), "{err}");
    }

    #[tokio::test]
    async fn test_fetch_backfills_unknown_ancestors() {
        let h = Harness::new();
        let mut previous = String::new();
        let mut cids = Vec::new();
        for i in 0..4 {
            let mut record = MemoryRecord::unsigned(json!({ "i": i }), previous.clone(), "2024-01-01T00:00:00Z", "test");
            record.signature = h.signer.sign(&record.signing_bytes().unwrap()).unwrap();
            let cid = h
                .store
                .upload(record.to_upload_bytes().unwrap(), &UploadOptions::default())
                .await
                .unwrap();
            cids.push(cid.clone());
            previous = cid;
        }

        let cache = Arc::new(RecordCache::open_in_memory().unwrap());
        let ledger = h.ledger(cache.clone());
        let (head, handle) = ledger.fetch_and_backfill(&cids[3]).await.unwrap();
        assert_eq!(head.payload["i"], 3);

        let report = handle.expect("backfill scheduled").await.unwrap();
        assert_eq!(report.stop, BackfillStop::Genesis);
        assert_eq!(report.downloaded, 3);
        for cid in &cids {
            assert!(cache.contains(cid).unwrap());
        }

        // 祖先都已缓存，不再调度
        let (_, again) = ledger.fetch_and_backfill(&cids[3]).await.unwrap();
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn test_list_records_by_author_and_text() {
        let h = Harness::new();
        let cache = Arc::new(RecordCache::open_in_memory().unwrap());
        let ledger = h.ledger(cache.clone());
        for note in ["posted a thread", "replied to a mention", "posted a poll"] {
            ledger.append(json!({ "note": note })).await.unwrap();
        }

        let page = cache
            .list(&RecordQuery {
                search: Some("POSTED".into()),
                author: Some(ledger.identity().to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.pagination.total, 2);
        assert_eq!(page.data[0].payload["note"], "posted a poll");

        let err = cache
            .list(&RecordQuery {
                limit: 101,
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidQuery(_)));
    }
}
