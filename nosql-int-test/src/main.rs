use nosql::driver::{BackendKind, Driver};
use nosql::errors::{NoSqlError, NoSqlResult};
use nosql::options::Options;
use nosql::transaction::Transaction;
use nosql_int_test::test_util::random_bucket;
use std::env;
use tempfile::TempDir;

/// Usage: `nosql_int_test [backend] [locator] [count]`
///
/// Without a locator the embedded engines write to a temporary directory.
#[tokio::main]
async fn main() -> NoSqlResult<()> {
    colog::init();
    let args: Vec<String> = env::args().collect();
    let kind: BackendKind = args.get(1).map(String::as_str).unwrap_or("fjall").parse()?;
    let count: usize = match args.get(3) {
        Some(count) => count
            .parse()
            .map_err(|_| NoSqlError::invalid(&format!("bad record count {}", count)))?,
        None => 100_000,
    };

    let dir = TempDir::new()
        .map_err(|err| NoSqlError::new_with_cause("failed to create temp dir", nosql::ErrorKind::Internal, err))?;
    let locator = match args.get(2) {
        Some(locator) => locator.clone(),
        None => dir.path().join("stress").to_string_lossy().into_owned(),
    };

    println!("Starting stress test on {}...", kind);
    let db = nosql_backends::open(kind, &locator, Options::default()).await?;
    let bucket = random_bucket("stress");
    db.create_table(&bucket).await?;

    let start = std::time::Instant::now();
    for i in 0..count {
        let key = format!("record-{:08}", i);
        db.set(&bucket, key.as_bytes(), uuid::Uuid::new_v4().as_bytes()).await?;
    }
    println!("Inserted {} records in {:?}", count, start.elapsed());

    let start = std::time::Instant::now();
    let entries = db.list(&bucket).await?;
    println!("Listed {} records in {:?}", entries.len(), start.elapsed());

    let start = std::time::Instant::now();
    let mut swapped = 0;
    for entry in entries.iter().step_by(10) {
        let outcome = db
            .compare_and_swap(&bucket, &entry.key, Some(&entry.value), b"processed")
            .await?;
        if outcome.swapped {
            swapped += 1;
        }
    }
    println!("Swapped {} records in {:?}", swapped, start.elapsed());

    let start = std::time::Instant::now();
    let mut batches = 0;
    for chunk in entries.chunks(100) {
        let tx = chunk.iter().fold(Transaction::new(), |tx, entry| {
            tx.delete(bucket.clone(), entry.key.clone())
        });
        db.update(tx).await?;
        batches += 1;
    }
    println!("Deleted all records in {} updates in {:?}", batches, start.elapsed());

    db.delete_table(&bucket).await?;
    db.close().await?;
    Ok(())
}
