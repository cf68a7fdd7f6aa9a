use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::{
    domain::{Marker, MarkerId},
    protocol::NewMarker,
};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn insert_marker(&self, new: &NewMarker) -> Result<Marker> {
        let row = sqlx::query(
            "INSERT INTO markers (lat, lng, name, message, country)
             VALUES (?, ?, ?, ?, ?)
             RETURNING id, lat, lng, name, message, country, created_at",
        )
        .bind(new.lat)
        .bind(new.lng)
        .bind(&new.name)
        .bind(&new.message)
        .bind(&new.country)
        .fetch_one(&self.pool)
        .await?;
        Ok(marker_from_row(&row))
    }

    /// Returns every marker in insertion order (oldest first).
    pub async fn list_markers(&self) -> Result<Vec<Marker>> {
        let rows = sqlx::query(
            "SELECT id, lat, lng, name, message, country, created_at
             FROM markers
             ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(marker_from_row).collect())
    }
}

fn marker_from_row(row: &sqlx::sqlite::SqliteRow) -> Marker {
    Marker {
        id: MarkerId(row.get::<i64, _>(0)),
        lat: row.get::<f64, _>(1),
        lng: row.get::<f64, _>(2),
        name: row.get::<String, _>(3),
        message: row.get::<String, _>(4),
        country: row.get::<String, _>(5),
        created_at: row.get::<DateTime<Utc>, _>(6),
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
