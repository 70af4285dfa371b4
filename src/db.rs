use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::config::Config;

pub async fn connect(config: &Config) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .context("failed to connect to Postgres")
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let members: Vec<(i64, &str, Option<i64>, Vec<i64>)> = vec![
        (1001, "enrolled", Some(10), vec![]),
        (1002, "preview-only", None, vec![20]),
        (1003, "curator", None, vec![]),
    ];

    for (user_id, tier, enrolled_collection_id, unlocked) in members {
        sqlx::query(
            r#"
            INSERT INTO engagement.members (user_id, tier, enrolled_collection_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id) DO UPDATE
            SET tier = EXCLUDED.tier, enrolled_collection_id = EXCLUDED.enrolled_collection_id
            "#,
        )
        .bind(user_id)
        .bind(tier)
        .bind(enrolled_collection_id)
        .execute(pool)
        .await?;

        for collection_id in unlocked {
            sqlx::query(
                r#"
                INSERT INTO engagement.member_unlocks (user_id, collection_id)
                VALUES ($1, $2)
                ON CONFLICT (user_id, collection_id) DO NOTHING
                "#,
            )
            .bind(user_id)
            .bind(collection_id)
            .execute(pool)
            .await?;
        }
    }

    let content: Vec<(i64, Option<i64>, i64, &str)> = vec![
        (501, Some(10), 1, "Foundations: reading the first chapter"),
        (502, Some(10), 1, "Foundations: review questions"),
        (601, Some(20), 2, "Advanced: commentary on chapter two"),
        (701, None, 3, "Unfiled draft"),
    ];

    for (content_id, collection_id, topic_id, title) in content {
        upsert_content(pool, content_id, collection_id, topic_id, title).await?;
    }

    Ok(())
}

/// Loads catalog rows; returns how many were new.
pub async fn import_catalog(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        content_id: i64,
        collection_id: Option<i64>,
        topic_id: i64,
        title: String,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut inserted = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        if upsert_content(pool, row.content_id, row.collection_id, row.topic_id, &row.title).await? {
            inserted += 1;
        }
    }

    Ok(inserted)
}

async fn upsert_content(
    pool: &PgPool,
    content_id: i64,
    collection_id: Option<i64>,
    topic_id: i64,
    title: &str,
) -> anyhow::Result<bool> {
    // xmax = 0 only for freshly inserted rows
    let inserted: bool = sqlx::query_scalar(
        r#"
        INSERT INTO engagement.content_items (content_id, collection_id, topic_id, title)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (content_id) DO UPDATE
        SET collection_id = EXCLUDED.collection_id,
            topic_id = EXCLUDED.topic_id,
            title = EXCLUDED.title
        RETURNING (xmax = 0)
        "#,
    )
    .bind(content_id)
    .bind(collection_id)
    .bind(topic_id)
    .bind(title)
    .fetch_one(pool)
    .await?;
    Ok(inserted)
}
