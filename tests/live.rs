//! Tests against a real PostgreSQL server.
//!
//! Ignored by default. Start a server and point `PGKIT_*` at it:
//! `podman run -d --name pgkit-test -e POSTGRES_USER=pgkit -e POSTGRES_PASSWORD=pgkit -p 5432:5432 postgres:17`
//! Then: `PGKIT_USER=pgkit PGKIT_PASSWORD=pgkit cargo test --test live -- --ignored --nocapture`

use chrono::NaiveDate;
use pgkit::prelude::*;

fn db() -> Postgres {
    let config = PostgresConfig::from_env()
        .unwrap_or_else(|_| PostgresConfig::new("pgkit", "pgkit", "127.0.0.1"))
        .pool_size(1, 2);
    Postgres::new(&config)
}

#[tokio::test]
#[ignore]
async fn test_insert_select_roundtrip() -> PgKitResult<()> {
    let db = db();

    // Temp tables live on one session, so everything runs on one connection.
    let rows = db
        .transaction(|tx| {
            Box::pin(async move {
                tx.run(
                    "CREATE TEMP TABLE pgkit_people (
                        id BIGINT PRIMARY KEY,
                        name TEXT DEFAULT 'anonymous',
                        born DATE,
                        score NUMERIC
                    )",
                    (),
                )
                .await?;
                tx.insert(
                    "pgkit_people",
                    vec![
                        Record::new().with("id", 1).with("name", "ada"),
                        Record::new()
                            .with("id", 2)
                            .with("born", NaiveDate::from_ymd_opt(1990, 5, 17).unwrap()),
                    ],
                )
                .await?;
                tx.run("SELECT id, name, born, score FROM pgkit_people ORDER BY id", ())
                    .await
            })
        })
        .await?
        .into_rows();

    println!("Fetched {} rows:", rows.len());
    for row in &rows {
        println!("  {:?}", row);
    }

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("name"), Some(&Value::Text("ada".into())));
    assert_eq!(rows[1].get("name"), Some(&Value::Text("anonymous".into())));
    assert_eq!(
        rows[1].get("born"),
        Some(&Value::Date(NaiveDate::from_ymd_opt(1990, 5, 17).unwrap()))
    );
    assert_eq!(rows[0].get("score"), Some(&Value::Null));

    db.close().await;
    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_null_binds_infer_type() -> PgKitResult<()> {
    let db = db();
    let outcome = db
        .run("SELECT $1::int8 IS NULL AS missing", params![None::<i64>])
        .await?;
    assert_eq!(
        outcome.into_rows(),
        vec![Record::new().with("missing", true)]
    );
    db.close().await;
    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_uncommon_types_decode() -> PgKitResult<()> {
    let db = db();
    let rows = db
        .run(
            "SELECT '04:05:06'::time AS t,
                    '1 year 2 mons 3 days 04:05:06'::interval AS span,
                    '\\xdeadbeef'::bytea AS blob,
                    ARRAY[1, NULL, 3]::int4[] AS ids,
                    ARRAY['a', 'b']::text[] AS tags,
                    '10.0.0.0/8'::cidr AS net,
                    '192.168.1.5'::inet AS host,
                    'NaN'::numeric AS nan,
                    '(1,2)'::point AS pt,
                    1 AS id,
                    2 AS id",
            (),
        )
        .await?
        .into_rows();

    let row = &rows[0];
    println!("{:?}", row);
    assert_eq!(row.get("t"), Some(&Value::Text("04:05:06".into())));
    assert_eq!(
        row.get("span"),
        Some(&Value::Text("1 year 2 mons 3 days 04:05:06".into()))
    );
    assert_eq!(row.get("blob"), Some(&Value::Text("\\xdeadbeef".into())));
    assert_eq!(row.get("ids"), Some(&Value::Json(serde_json::json!([1, null, 3]))));
    assert_eq!(row.get("tags"), Some(&Value::Json(serde_json::json!(["a", "b"]))));
    assert_eq!(row.get("net"), Some(&Value::Text("10.0.0.0/8".into())));
    assert_eq!(row.get("host"), Some(&Value::Text("192.168.1.5/32".into())));
    assert!(row.contains("nan"));
    assert!(row.contains("pt"));
    assert_eq!(row.get("id"), Some(&Value::Int(1)));
    assert_eq!(row.get("id_1"), Some(&Value::Int(2)));

    db.close().await;
    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_typed_fields_insert_into_typed_columns() -> PgKitResult<()> {
    #[derive(serde::Serialize)]
    struct Payment {
        #[serde(with = "pgkit::typed::uuid")]
        id: uuid::Uuid,
        #[serde(with = "pgkit::typed::date")]
        due: NaiveDate,
        #[serde(with = "pgkit::typed::decimal")]
        amount: rust_decimal::Decimal,
    }

    let db = db();
    let payment = Payment {
        id: uuid::Uuid::from_u128(7),
        due: NaiveDate::from_ymd_opt(2025, 1, 31).unwrap(),
        amount: rust_decimal::Decimal::new(1999, 2),
    };
    let values = ValueSet::from_serialize(&[payment])?;

    let inserted = db
        .transaction(|tx| {
            Box::pin(async move {
                tx.run(
                    "CREATE TEMP TABLE pgkit_payments (id UUID, due DATE, amount NUMERIC(10, 2))",
                    (),
                )
                .await?;
                tx.insert("pgkit_payments", values).await
            })
        })
        .await?;

    assert_eq!(inserted, 1);
    db.close().await;
    Ok(())
}
