use nosql::driver::Driver;
use nosql::errors::{ErrorKind, NoSqlResult};
use nosql::staging::{is_record_key, MemoryItemStore, RecoveryReport, StagingEngine, TxRecord, TxState};
use nosql::transaction::Transaction;
use nosql_int_test::contract_tests;
use nosql_int_test::test_util::{create_staging_context, run_test, TestContext};
use std::time::Duration;

#[ctor::ctor]
fn init() {
    colog::init();
}

async fn staging() -> NoSqlResult<Option<TestContext>> {
    create_staging_context().map(Some)
}

contract_tests!(staging);
contract_tests!(staging; closed_driver_rejects_calls);

fn engine(ctx: &TestContext) -> &StagingEngine<MemoryItemStore> {
    ctx.staging().expect("staging context")
}

fn records(store: &MemoryItemStore, bucket: &[u8]) -> Vec<TxRecord> {
    store
        .raw_items(bucket)
        .into_iter()
        .filter(|item| is_record_key(&item.key))
        .filter_map(|item| item.value)
        .map(|bytes| TxRecord::decode(&bytes).unwrap())
        .collect()
}

fn assert_settled(store: &MemoryItemStore, bucket: &[u8]) {
    let items = store.raw_items(bucket);
    assert!(items.iter().all(|item| !item.is_locked()), "locks left behind");
    assert!(items.iter().all(|item| !is_record_key(&item.key)), "records left behind");
}

async fn seed(ctx: &TestContext) -> NoSqlResult<Vec<u8>> {
    let bucket = ctx.create_bucket("staged").await?;
    let db = ctx.db();
    db.set(&bucket, b"a", b"a0").await?;
    db.set(&bucket, b"b", b"b0").await?;
    Ok(bucket)
}

fn swap_both(bucket: &[u8]) -> Transaction {
    Transaction::new()
        .set(bucket.to_vec(), "a", "a1")
        .set(bucket.to_vec(), "b", "b1")
}

#[tokio::test]
async fn committed_update_leaves_no_trace() {
    run_test(staging, |ctx| async move {
        let bucket = seed(&ctx).await?;
        let db = ctx.db();

        db.update(swap_both(&bucket)).await?;
        assert_eq!(db.get(&bucket, b"a").await?, b"a1");
        assert_eq!(db.get(&bucket, b"b").await?, b"b1");
        assert_settled(engine(&ctx).item_store(), &bucket);
        Ok(())
    })
    .await;
}

#[tokio::test]
async fn crash_after_commit_point_is_rolled_forward() {
    run_test(staging, |ctx| async move {
        let bucket = seed(&ctx).await?;
        let db = ctx.db();
        let store = engine(&ctx).item_store().clone();

        // record, two locks, two staged writes and the commit flip go through,
        // applying the first key does not
        store.crash_after_writes(6);
        db.update(swap_both(&bucket)).await?;

        let stuck = records(&store, &bucket);
        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].state, TxState::Committed);
        assert!(store.raw(&bucket, b"a").map(|item| item.is_locked()).unwrap_or(false));

        // readers already see the committed values through the record
        assert_eq!(db.get(&bucket, b"a").await?, b"a1");
        assert_eq!(db.get(&bucket, b"b").await?, b"b1");
        let listed = db.list(&bucket).await?;
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|entry| entry.value.ends_with(b"1")));

        store.heal();
        let report = engine(&ctx).recover(&bucket).await?;
        assert_eq!(
            report,
            RecoveryReport {
                rolled_forward: 1,
                rolled_back: 0,
                in_flight: 0
            }
        );
        assert_settled(&store, &bucket);
        assert_eq!(db.get(&bucket, b"a").await?, b"a1");
        assert_eq!(db.get(&bucket, b"b").await?, b"b1");
        Ok(())
    })
    .await;
}

#[tokio::test]
async fn crash_before_commit_point_is_rolled_back() {
    run_test(staging, |ctx| async move {
        let bucket = seed(&ctx).await?;
        let db = ctx.db();
        let store = engine(&ctx).item_store().clone();

        // the record and both locks are written, staging the first write fails
        store.crash_after_writes(3);
        let err = db.update(swap_both(&bucket)).await.unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::Unavailable);

        let stuck = records(&store, &bucket);
        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].state, TxState::Pending);

        store.heal();
        // readers see the old values, writers wait for the lock timeout
        assert_eq!(db.get(&bucket, b"a").await?, b"a0");
        assert_eq!(db.get(&bucket, b"b").await?, b"b0");
        let err = db.set(&bucket, b"a", b"blocked").await.unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::Unavailable);

        let report = engine(&ctx).recover(&bucket).await?;
        assert_eq!(report.in_flight, 1);

        tokio::time::sleep(Duration::from_millis(300)).await;
        let report = engine(&ctx).recover(&bucket).await?;
        assert_eq!(report.rolled_back, 1);
        assert_eq!(report.rolled_forward, 0);
        assert_settled(&store, &bucket);
        assert_eq!(db.get(&bucket, b"a").await?, b"a0");
        assert_eq!(db.get(&bucket, b"b").await?, b"b0");

        db.set(&bucket, b"a", b"free").await?;
        Ok(())
    })
    .await;
}

#[tokio::test]
async fn single_fault_aborts_cleanly() {
    run_test(staging, |ctx| async move {
        let bucket = seed(&ctx).await?;
        let db = ctx.db();
        let store = engine(&ctx).item_store().clone();

        // only the second lock fails; the abort path still runs
        store.fail_write_after(2);
        let tx = Transaction::new()
            .set(bucket.clone(), "a", "a1")
            .delete(bucket.clone(), "b");
        let err = db.update(tx).await.unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::Unavailable);

        assert_settled(&store, &bucket);
        assert_eq!(db.get(&bucket, b"a").await?, b"a0");
        assert_eq!(db.get(&bucket, b"b").await?, b"b0");
        Ok(())
    })
    .await;
}
