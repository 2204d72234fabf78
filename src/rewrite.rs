//! Similarity-gated rewrite engine.
//!
//! [`RewriteEngine::evaluate`] embeds the target once, then walks the items
//! in order: each item is embedded, compared against the target, and sent
//! to the generator when its similarity falls below the threshold. The
//! result is a lazy [`Stream`] of [`RewriteEvent`]s: zero or more
//! `Progress` values followed by exactly one terminal `Patch`.
//!
//! Dropping the stream stops work: no further items are scheduled and the
//! in-flight provider call is dropped with it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tracing::{debug, info};

use refinery_core::embedding::cosine_similarity;
use refinery_core::patch::{build_patch, PatchOp};
use refinery_core::provider::ModelProvider;
use refinery_core::{Error, Result};

use crate::config::Config;
use crate::providers::{select_provider, Capability};

/// One event of an evaluation stream.
#[derive(Debug, Clone, PartialEq)]
pub enum RewriteEvent {
    /// Percentage of items processed, snapped down to a multiple of 10.
    Progress(u8),
    /// The full replacement patch. Always the last event.
    Patch(Vec<PatchOp>),
}

pub struct RewriteEngine {
    embedder: Arc<dyn ModelProvider>,
    generator: Arc<dyn ModelProvider>,
    threshold: f32,
    call_timeout: Duration,
}

impl RewriteEngine {
    pub fn new(
        embedder: Arc<dyn ModelProvider>,
        generator: Arc<dyn ModelProvider>,
        threshold: f32,
        call_timeout: Duration,
    ) -> Self {
        Self {
            embedder,
            generator,
            threshold,
            call_timeout,
        }
    }

    /// Select an embedder and a generator from the configured provider
    /// list, first success in order.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let embedder = select_provider(&config.providers, Capability::Embed).await?;
        let generator = select_provider(&config.providers, Capability::Generate).await?;
        Ok(Self::new(
            embedder,
            generator,
            config.rewrite.threshold,
            config.rewrite.call_timeout(),
        ))
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Same providers and timeout, different threshold.
    pub fn with_threshold(&self, threshold: f32) -> Result<Self> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(Error::InvalidInput(format!(
                "threshold {} is outside [0, 1]",
                threshold
            )));
        }
        Ok(Self {
            embedder: self.embedder.clone(),
            generator: self.generator.clone(),
            threshold,
            call_timeout: self.call_timeout,
        })
    }

    /// Start an evaluation. Nothing runs until the stream is polled.
    ///
    /// An empty `items` list yields a single [`Error::InvalidInput`]. Any
    /// per-item failure yields one [`Error::Evaluation`] and ends the
    /// stream without a patch.
    pub fn evaluate(
        &self,
        items: Vec<String>,
        target: String,
    ) -> impl Stream<Item = Result<RewriteEvent>> + Send + 'static {
        let embedder = self.embedder.clone();
        let generator = self.generator.clone();
        let threshold = self.threshold;
        let limit = self.call_timeout;

        async_stream::try_stream! {
            if items.is_empty() {
                Err::<(), _>(Error::InvalidInput("items must not be empty".to_string()))?;
            }
            let total = items.len();
            info!(items = total, threshold, embedder = embedder.name(), "evaluation started");

            let target_vec = bounded("embed", limit, embedder.embed(&target)).await?;

            let mut replacements: HashMap<usize, String> = HashMap::new();
            let mut last_progress = 0u8;

            for (i, item) in items.iter().enumerate() {
                let replacement =
                    process_item(&*embedder, &*generator, &target, &target_vec, item, threshold, limit)
                        .await
                        .map_err(|e| Error::evaluation(i, e))?;
                if let Some(text) = replacement {
                    replacements.insert(i, text);
                }

                let done = i + 1;
                let progress = progress_percent(done, total);
                if progress != last_progress || done == total {
                    last_progress = progress;
                    yield RewriteEvent::Progress(progress);
                }
            }

            info!(items = total, rewritten = replacements.len(), "evaluation finished");
            yield RewriteEvent::Patch(build_patch(&replacements));
        }
    }
}

async fn process_item(
    embedder: &dyn ModelProvider,
    generator: &dyn ModelProvider,
    target: &str,
    target_vec: &[f32],
    item: &str,
    threshold: f32,
    limit: Duration,
) -> Result<Option<String>> {
    let item_vec = bounded("embed", limit, embedder.embed(item)).await?;
    let similarity = cosine_similarity(&item_vec, target_vec);
    if similarity >= threshold {
        debug!(similarity, "item kept");
        return Ok(None);
    }

    debug!(similarity, "item below threshold, rewriting");
    let generation = bounded("generate", limit, generator.generate(&rewrite_prompt(target, item))).await?;
    Ok(Some(generation.into_text()))
}

/// `floor(done / total * 10) * 10`, in integer arithmetic.
pub fn progress_percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done * 10 / total) * 10).min(100) as u8
}

pub fn rewrite_prompt(target: &str, item: &str) -> String {
    format!(
        "Rewrite the following item to better match the target. \
         Reply with the rewritten item only.\nTarget: {}\nItem: {}",
        target, item
    )
}

async fn bounded<T>(
    operation: &'static str,
    limit: Duration,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(Error::ProviderTimeout {
            operation,
            timeout: limit,
        }),
    }
}
