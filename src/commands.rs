//! CLI command implementations.
//!
//! Each `run_*` function backs one `refinery` subcommand. Results go to
//! stdout as JSON (or SSE frames for `improve`); diagnostics go through
//! `tracing` to stderr.

use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use futures::StreamExt;
use serde::Serialize;

use refinery_core::store::ArtifactStore;

use crate::artifacts;
use crate::cache::IngestionCache;
use crate::config::Config;
use crate::extract::parse_document;
use crate::rewrite::RewriteEngine;
use crate::sqlite_store::SqliteStore;
use crate::sse::{error_frame, to_sse_frame};
use crate::{db, migrate};

/// Open the configured database with the schema applied.
pub async fn open_store(config: &Config) -> Result<Arc<dyn ArtifactStore>> {
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;
    Ok(Arc::new(SqliteStore::new(pool)))
}

pub async fn run_init(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;
    pool.close().await;
    println!("Database initialized at {}", config.db.path.display());
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Serialize)]
struct IngestOutput<'a> {
    artifact_id: &'a str,
    was_cached: bool,
    filename: &'a str,
}

pub async fn run_ingest(config: &Config, file: &Path, model: Option<&str>) -> Result<()> {
    let bytes = std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let filename = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());
    let model = model.unwrap_or(&config.cache.model);

    let cache = IngestionCache::new(open_store(config).await?, &config.cache);
    let owned = bytes.clone();
    let name = filename.clone();
    let resolution = cache
        .resolve(&bytes, model, move || parse_document(owned, name))
        .await?;

    print_json(&IngestOutput {
        artifact_id: &resolution.record.id,
        was_cached: resolution.was_cached,
        filename: &resolution.record.filename,
    })
}

pub async fn run_list(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    let records = artifacts::list(store.as_ref()).await?;
    if records.is_empty() {
        eprintln!("No artifacts stored.");
    }
    print_json(&records)
}

pub async fn run_get(config: &Config, id: &str) -> Result<()> {
    let store = open_store(config).await?;
    print_json(&artifacts::get(store.as_ref(), id).await?)
}

pub async fn run_rename(config: &Config, id: &str, name: &str) -> Result<()> {
    let store = open_store(config).await?;
    print_json(&artifacts::rename(store.as_ref(), id, Some(name)).await?)
}

pub async fn run_delete(config: &Config, id: &str) -> Result<()> {
    let store = open_store(config).await?;
    artifacts::delete(store.as_ref(), id).await?;
    println!("Deleted {}", id);
    Ok(())
}

/// Non-blank lines, one item each.
pub fn read_items(reader: impl BufRead) -> Result<Vec<String>> {
    let mut items = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            items.push(trimmed.to_string());
        }
    }
    Ok(items)
}

pub async fn run_improve(
    config: &Config,
    target: &str,
    items_file: Option<&Path>,
    threshold: Option<f32>,
) -> Result<()> {
    let items = match items_file {
        Some(path) => {
            let file = std::fs::File::open(path)
                .with_context(|| format!("Failed to open {}", path.display()))?;
            read_items(std::io::BufReader::new(file))?
        }
        None => read_items(std::io::stdin().lock())?,
    };
    if items.is_empty() {
        bail!("no items to improve; pass --items-file or pipe one item per line");
    }

    let mut engine = RewriteEngine::from_config(config).await?;
    if let Some(t) = threshold {
        engine = engine.with_threshold(t)?;
    }

    let stdout = std::io::stdout();
    let mut events = Box::pin(engine.evaluate(items, target.to_string()));
    while let Some(event) = events.next().await {
        let mut out = stdout.lock();
        match event {
            Ok(event) => {
                out.write_all(to_sse_frame(&event).as_bytes())?;
                out.flush()?;
            }
            Err(e) => {
                out.write_all(error_frame(&e).as_bytes())?;
                out.flush()?;
                return Err(e.into());
            }
        }
    }
    Ok(())
}
