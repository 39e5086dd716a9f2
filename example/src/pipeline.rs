use std::time::Instant;
use pgpipe::{Connection, QueryDescriptor, Result, encode_batch, encode_uniform_batch};

const ROUNDS: usize = 16;
const CONNECTIONS: usize = 4;

pub async fn main() -> Result<()> {
    let mut conn = Connection::connect_env().await?;

    let batch = encode_batch(&[
        QueryDescriptor::new("pg_catalog.pg_type", 10).column("oid").column("typname"),
        QueryDescriptor::new("pg_catalog.pg_namespace", 5),
        QueryDescriptor::new("missing_table", 1),
        QueryDescriptor::new("pg_catalog.pg_class", 1),
    ])?;

    let outcome = conn.pipeline(&batch).await?;
    match outcome.error() {
        Some(err) => tracing::info!(completed = outcome.completed, "batch failed: {err}"),
        None => tracing::info!(completed = outcome.completed, "batch ready"),
    }

    // the connection is still usable after a failed batch
    let query = QueryDescriptor::new("pg_catalog.pg_type", 10).column("oid");
    let batch = encode_uniform_batch(&query, 100)?;

    let start = Instant::now();
    for _ in 0..ROUNDS {
        let completed = conn.pipeline(&batch).await?.into_result()?;
        assert_eq!(completed, batch.expected());
    }
    tracing::info!(queries = ROUNDS * batch.expected(), elapsed = ?start.elapsed(), "single connection");
    conn.close().await?;

    let start = Instant::now();
    let mut handles = vec![];
    for _ in 0..CONNECTIONS {
        let batch = batch.clone();
        handles.push(tokio::spawn(async move {
            let mut conn = Connection::connect_env().await?;
            let mut completed = 0;
            for _ in 0..ROUNDS {
                completed += conn.pipeline(&batch).await?.into_result()?;
            }
            conn.close().await?;
            Result::<usize>::Ok(completed)
        }));
    }

    let mut total = 0;
    for handle in handles {
        total += handle.await.expect("pipeline task panicked")?;
    }
    tracing::info!(queries = total, elapsed = ?start.elapsed(), "{CONNECTIONS} connections");

    Ok(())
}
