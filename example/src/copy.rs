use pgpipe::{Connection, Field, Result, encode_rows};

pub async fn main() -> Result<()> {
    let mut conn = Connection::connect_env().await?;

    conn.simple_query("CREATE TEMP TABLE harbors (id int8, name text, depth float8, active bool)").await?;

    let names = ["Rotterdam", "Antwerp\tBelgium", "Hamburg\\Altona", "Le Havre\n"];
    let rows = encode_rows(names.iter().enumerate().map(|(i, name)| {
        [
            Field::Int(i as i64),
            Field::from(*name),
            Field::Float(10.5 + i as f64),
            if i % 2 == 0 { Field::Bool(true) } else { Field::Null },
        ]
    }))?;

    // the same buffer can be loaded any number of times
    for _ in 0..3 {
        let copied = conn.copy_in("harbors", &["id", "name", "depth", "active"], &rows).await?;
        assert_eq!(copied, names.len() as u64);
    }

    let count = conn.simple_query("DELETE FROM harbors").await?;
    tracing::info!(count, "copied");
    assert_eq!(count, 3 * names.len() as u64);

    if let Err(err) = conn.copy_in("missing_table", &[], &rows).await {
        tracing::info!(fatal = err.is_fatal(), "{err}");
    }

    conn.close().await?;
    Ok(())
}
