//! Behavior every driver must show, written once and run against each backend.
//!
//! Each check takes a fresh [`TestContext`], creates its own buckets through
//! it and leaves their removal to [`cleanup`](crate::test_util::cleanup).

use crate::test_util::{random_bucket, TestContext, SMALL_PAGE};
use nosql::driver::Driver;
use nosql::errors::{ErrorKind, NoSqlResult};
use nosql::transaction::{OpResult, Transaction};
use std::collections::{HashMap, HashSet};

/// Writers racing on one key in [`cas_exclusivity`].
const CAS_WRITERS: usize = 8;

pub async fn round_trip(ctx: TestContext) -> NoSqlResult<()> {
    let db = ctx.db();
    let bucket = ctx.create_bucket("rt").await?;

    db.set(&bucket, b"alice", b"v1").await?;
    assert_eq!(db.get(&bucket, b"alice").await?, b"v1");

    db.set(&bucket, b"alice", b"v2").await?;
    assert_eq!(db.get(&bucket, b"alice").await?, b"v2");

    let binary: Vec<u8> = (0..=255).collect();
    db.set(&bucket, b"binary", &binary).await?;
    assert_eq!(db.get(&bucket, b"binary").await?, binary);

    db.set(&bucket, b"empty", b"").await?;
    assert_eq!(db.get(&bucket, b"empty").await?, b"");

    let err = db.get(&bucket, b"nobody").await.unwrap_err();
    assert!(err.is_not_found());
    Ok(())
}

pub async fn delete_is_idempotent(ctx: TestContext) -> NoSqlResult<()> {
    let db = ctx.db();
    let bucket = ctx.create_bucket("del").await?;

    db.del(&bucket, b"ghost").await?;
    db.del(&bucket, b"ghost").await?;

    db.set(&bucket, b"alice", b"v1").await?;
    db.del(&bucket, b"alice").await?;
    db.del(&bucket, b"alice").await?;
    assert!(db.get(&bucket, b"alice").await.unwrap_err().is_not_found());
    Ok(())
}

pub async fn cas_exclusivity(ctx: TestContext) -> NoSqlResult<()> {
    let db = ctx.db();
    let bucket = ctx.create_bucket("cas").await?;
    db.set(&bucket, b"counter", b"0").await?;

    let mut handles = Vec::with_capacity(CAS_WRITERS);
    for writer in 0..CAS_WRITERS {
        let db = db.clone();
        let bucket = bucket.clone();
        handles.push(tokio::spawn(async move {
            let new = format!("writer-{}", writer).into_bytes();
            let outcome = db.compare_and_swap(&bucket, b"counter", Some(b"0"), &new).await;
            (new, outcome)
        }));
    }

    let mut winners = Vec::new();
    let mut losers = Vec::new();
    for handle in handles {
        let (new, outcome) = handle.await.expect("writer task panicked");
        let outcome = outcome?;
        if outcome.swapped {
            assert_eq!(outcome.current.as_deref(), Some(&b"0"[..]));
            winners.push(new);
        } else {
            losers.push(outcome.current);
        }
    }

    assert_eq!(winners.len(), 1, "exactly one writer must win");
    let winner = winners.remove(0);
    for current in losers {
        assert_eq!(current.as_deref(), Some(winner.as_slice()));
    }
    assert_eq!(db.get(&bucket, b"counter").await?, winner);
    Ok(())
}

/// Updates racing to claim one absent key through a compare-and-swap: one
/// claims it, the others either see the claim or fail with a retryable error.
pub async fn update_cas_exclusivity(ctx: TestContext) -> NoSqlResult<()> {
    let db = ctx.db();
    let bucket = ctx.create_bucket("ucas").await?;

    let mut handles = Vec::with_capacity(CAS_WRITERS);
    for writer in 0..CAS_WRITERS {
        let db = db.clone();
        let bucket = bucket.clone();
        handles.push(tokio::spawn(async move {
            let new = format!("writer-{}", writer).into_bytes();
            let tx = Transaction::new().compare_and_swap(bucket, "slot", None, new.clone());
            (new, db.update(tx).await)
        }));
    }

    let mut winners = Vec::new();
    for handle in handles {
        let (new, outcome) = handle.await.expect("writer task panicked");
        match outcome {
            Ok(outcome) => {
                let swapped = outcome.get(0).and_then(OpResult::cas).map(|cas| cas.swapped);
                if swapped == Some(true) {
                    winners.push(new);
                }
            }
            Err(err) => assert!(err.is_transient(), "unexpected error: {}", err),
        }
    }

    assert_eq!(winners.len(), 1, "exactly one update must claim the key");
    assert_eq!(db.get(&bucket, b"slot").await?, winners[0]);
    Ok(())
}

pub async fn cas_not_exists(ctx: TestContext) -> NoSqlResult<()> {
    let db = ctx.db();
    let bucket = ctx.create_bucket("cnx").await?;

    let outcome = db.compare_and_swap(&bucket, b"lock", None, b"owner-1").await?;
    assert!(outcome.swapped);
    assert_eq!(outcome.current, None);

    let outcome = db.compare_and_swap(&bucket, b"lock", None, b"owner-2").await?;
    assert!(!outcome.swapped);
    assert_eq!(outcome.current.as_deref(), Some(&b"owner-1"[..]));
    assert_eq!(db.get(&bucket, b"lock").await?, b"owner-1");

    // a stale expectation fails with the value actually stored
    let outcome = db
        .compare_and_swap(&bucket, b"lock", Some(b"owner-0"), b"owner-3")
        .await?;
    assert!(!outcome.swapped);
    assert_eq!(outcome.current.as_deref(), Some(&b"owner-1"[..]));

    let outcome = db
        .compare_and_swap(&bucket, b"missing", Some(b"anything"), b"v")
        .await?;
    assert!(!outcome.swapped);
    assert_eq!(outcome.current, None);
    assert!(db.get(&bucket, b"missing").await.unwrap_err().is_not_found());
    Ok(())
}

pub async fn update_is_atomic(ctx: TestContext) -> NoSqlResult<()> {
    let db = ctx.db();
    let bucket = ctx.create_bucket("atom").await?;
    db.set(&bucket, b"a", b"a0").await?;
    db.set(&bucket, b"b", b"b0").await?;

    // the last operation targets a bucket that does not exist
    let missing = random_bucket("gone");
    let tx = Transaction::new()
        .set(bucket.clone(), "a", "a1")
        .delete(bucket.clone(), "b")
        .set(missing, "c", "c1");
    let err = db.update(tx).await.unwrap_err();
    assert!(err.is_not_found(), "unexpected error: {}", err);

    assert_eq!(db.get(&bucket, b"a").await?, b"a0");
    assert_eq!(db.get(&bucket, b"b").await?, b"b0");

    // a get of an absent key aborts the update as well
    let tx = Transaction::new()
        .set(bucket.clone(), "a", "a2")
        .delete(bucket.clone(), "b")
        .get(bucket.clone(), "nobody");
    let err = db.update(tx).await.unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::NotFound);

    assert_eq!(db.get(&bucket, b"a").await?, b"a0");
    assert_eq!(db.get(&bucket, b"b").await?, b"b0");
    Ok(())
}

pub async fn update_applies_in_order(ctx: TestContext) -> NoSqlResult<()> {
    let db = ctx.db();
    let bucket = ctx.create_bucket("ord").await?;
    db.set(&bucket, b"x", b"x0").await?;

    let tx = Transaction::new()
        .set(bucket.clone(), "x", "x1")
        .get(bucket.clone(), "x")
        .compare_and_swap(bucket.clone(), "x", Some(b"x0".to_vec()), "never")
        .compare_and_swap(bucket.clone(), "x", Some(b"x1".to_vec()), "x2")
        .set(bucket.clone(), "y", "y1")
        .delete(bucket.clone(), "y");
    let outcome = db.update(tx).await?;

    assert_eq!(outcome.len(), 6);
    assert_eq!(outcome.get(1).and_then(OpResult::value), Some(&b"x1"[..]));
    let failed = outcome.get(2).and_then(OpResult::cas).map(|cas| cas.swapped);
    assert_eq!(failed, Some(false));
    let swapped = outcome.get(3).and_then(OpResult::cas).map(|cas| cas.swapped);
    assert_eq!(swapped, Some(true));

    assert_eq!(db.get(&bucket, b"x").await?, b"x2");
    assert!(db.get(&bucket, b"y").await.unwrap_err().is_not_found());

    let outcome = db.update(Transaction::new()).await?;
    assert!(outcome.is_empty());
    Ok(())
}

pub async fn list_is_complete(ctx: TestContext) -> NoSqlResult<()> {
    let db = ctx.db();
    let bucket = ctx.create_bucket("list").await?;
    assert!(db.list(&bucket).await?.is_empty());

    let count = SMALL_PAGE * 5 + 3;
    let mut expected = HashMap::new();
    for i in 0..count {
        let key = format!("key-{:04}", i).into_bytes();
        let value = format!("value-{}", i).into_bytes();
        db.set(&bucket, &key, &value).await?;
        expected.insert(key, value);
    }

    let entries = db.list(&bucket).await?;
    assert_eq!(entries.len(), count);

    let keys: HashSet<&[u8]> = entries.iter().map(|entry| entry.key.as_slice()).collect();
    assert_eq!(keys.len(), count, "list returned duplicates");
    for entry in &entries {
        assert_eq!(entry.bucket, bucket);
        assert_eq!(expected.get(&entry.key), Some(&entry.value));
    }

    // entries of other buckets stay out
    let other = ctx.create_bucket("other").await?;
    db.set(&other, b"key-0000", b"elsewhere").await?;
    assert_eq!(db.list(&bucket).await?.len(), count);
    assert_eq!(db.list(&other).await?.len(), 1);
    Ok(())
}

pub async fn bucket_lifecycle(ctx: TestContext) -> NoSqlResult<()> {
    let db = ctx.db();
    let bucket = ctx.create_bucket("life").await?;

    let err = db.create_table(&bucket).await.unwrap_err();
    assert!(err.is_already_exists(), "unexpected error: {}", err);

    db.set(&bucket, b"k", b"v").await?;
    ctx.delete_bucket(&bucket).await?;

    let err = db.delete_table(&bucket).await.unwrap_err();
    assert!(err.is_not_found(), "unexpected error: {}", err);
    assert!(db.get(&bucket, b"k").await.unwrap_err().is_not_found());
    assert!(db.list(&bucket).await.unwrap_err().is_not_found());

    let err = db.create_table(b"").await.unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::Invalid);
    Ok(())
}

/// The users scenario: create, set, get, swap, get, drop, get.
pub async fn users_scenario(ctx: TestContext) -> NoSqlResult<()> {
    let db = ctx.db();
    let users = ctx.create_bucket("users").await?;

    db.set(&users, b"alice", b"v1").await?;
    assert_eq!(db.get(&users, b"alice").await?, b"v1");

    let outcome = db.compare_and_swap(&users, b"alice", Some(b"v1"), b"v2").await?;
    assert!(outcome.swapped);
    assert_eq!(outcome.current.as_deref(), Some(&b"v1"[..]));
    assert_eq!(db.get(&users, b"alice").await?, b"v2");

    ctx.delete_bucket(&users).await?;
    let err = db.get(&users, b"alice").await.unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::NotFound);
    Ok(())
}

pub async fn closed_driver_rejects_calls(ctx: TestContext) -> NoSqlResult<()> {
    let db = ctx.db();
    let bucket = ctx.create_bucket("close").await?;
    db.set(&bucket, b"k", b"v").await?;
    ctx.delete_bucket(&bucket).await?;

    db.close().await?;
    db.close().await?;
    let err = db.get(&bucket, b"k").await.unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::Closed);
    Ok(())
}

/// Embedded engines keep their data across a close and reopen.
pub async fn survives_reopen(mut ctx: TestContext) -> NoSqlResult<()> {
    let bucket = ctx.create_bucket("durable").await?;
    let db = ctx.db();
    db.set(&bucket, b"alice", b"v1").await?;
    let tx = Transaction::new()
        .set(bucket.clone(), "bob", "v1")
        .delete(bucket.clone(), "alice");
    db.update(tx).await?;

    ctx.reopen().await?;
    let db = ctx.db();
    assert!(db.get(&bucket, b"alice").await.unwrap_err().is_not_found());
    assert_eq!(db.get(&bucket, b"bob").await?, b"v1");
    assert_eq!(db.list(&bucket).await?.len(), 1);
    let err = db.create_table(&bucket).await.unwrap_err();
    assert!(err.is_already_exists());
    Ok(())
}

/// Declares one `#[tokio::test]` per contract check, each running against
/// the context returned by `$context`, an async fn yielding
/// `NoSqlResult<Option<TestContext>>`.
#[macro_export]
macro_rules! contract_tests {
    ($context:path) => {
        $crate::contract_tests!(
            $context;
            round_trip,
            delete_is_idempotent,
            cas_exclusivity,
            update_cas_exclusivity,
            cas_not_exists,
            update_is_atomic,
            update_applies_in_order,
            list_is_complete,
            bucket_lifecycle,
            users_scenario
        );
    };
    ($context:path; $($check:ident),+ $(,)?) => {
        $(
            #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
            async fn $check() {
                $crate::test_util::run_test($context, $crate::contract::$check).await;
            }
        )+
    };
}
