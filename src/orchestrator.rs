//! Drives every entity through session, extraction, filtering, download and
//! packaging, and records one outcome per entity.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::stream::{self, StreamExt};
use tracing::{error, info, info_span, warn, Instrument};

use crate::browser::BrowserLauncher;
use crate::config::Config;
use crate::context::RunContext;
use crate::download::DownloadManager;
use crate::error::HarvestError;
use crate::extract::StrategySet;
use crate::filter::filter_candidates;
use crate::fs_utils::sanitize_component;
use crate::models::{EntityOutcome, EntityRecord, ImageCandidate};
use crate::packager::archive_entity;
use crate::session::{search_url, SessionManager, SessionOptions};

pub struct Harvester {
    config: Config,
    launcher: Arc<dyn BrowserLauncher>,
    strategies: StrategySet,
    downloader: DownloadManager,
    ctx: RunContext,
}

impl Harvester {
    /// Build a harvester with the standard strategy set.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: Config, launcher: Arc<dyn BrowserLauncher>, ctx: RunContext) -> Result<Self> {
        let downloader = DownloadManager::new(config.download_policy(), ctx.clone())
            .context("Failed to create HTTP client")?;
        let strategies = StrategySet::standard(&config);
        Ok(Self {
            config,
            launcher,
            strategies,
            downloader,
            ctx,
        })
    }

    /// Replace the strategy set.
    #[must_use]
    pub fn with_strategies(mut self, strategies: StrategySet) -> Self {
        self.strategies = strategies;
        self
    }

    #[must_use]
    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Process `entities` and return their outcomes in input order.
    ///
    /// Up to `entity_concurrency` entities run at once, each with its own
    /// browser session. A failing entity never stops the others.
    pub async fn run(&self, entities: Vec<EntityRecord>) -> Vec<EntityOutcome> {
        let total = entities.len();
        info!(
            total,
            concurrency = self.config.entity_concurrency,
            "Starting harvest"
        );

        stream::iter(entities.into_iter().enumerate())
            .map(|(index, entity)| {
                let span = info_span!("entity", id = %entity.id, name = %entity.name);
                async move {
                    info!(position = index + 1, total, "Processing entity");
                    self.process_entity(entity).await
                }
                .instrument(span)
            })
            .buffered(self.config.entity_concurrency.max(1))
            .collect()
            .await
    }

    async fn process_entity(&self, entity: EntityRecord) -> EntityOutcome {
        let outcome = match self.harvest(&entity).await {
            Ok(outcome) => {
                if outcome.succeeded == 0 {
                    warn!(attempted = outcome.attempted, "No images downloaded");
                } else {
                    info!(
                        attempted = outcome.attempted,
                        succeeded = outcome.succeeded,
                        archived = outcome.archive_path.is_some(),
                        "Entity finished"
                    );
                }
                outcome
            }
            Err(e) => {
                error!(kind = ?e.kind(), "Entity failed: {e}");
                EntityOutcome::failed(entity)
            }
        };
        self.ctx.stats().entity_finished();
        outcome
    }

    async fn harvest(&self, entity: &EntityRecord) -> Result<EntityOutcome, HarvestError> {
        if self.ctx.is_cancelled() {
            return Err(HarvestError::Cancelled);
        }

        let entity_dir = self.entity_dir(entity);
        tokio::fs::create_dir_all(&entity_dir)
            .await
            .map_err(|e| HarvestError::io(&entity_dir, e))?;

        let candidates = self.collect_candidates(entity).await?;
        let filtered = filter_candidates(candidates, &self.config.filter_rules());
        info!(candidates = filtered.len(), "Candidates selected for download");

        let results = self.downloader.download_all(filtered, &entity_dir).await;
        let attempted = results.iter().filter(|r| r.attempts > 0).count();
        let succeeded = results.iter().filter(|r| r.is_success()).count();

        let archive_path = if self.config.create_archive && !self.ctx.is_cancelled() {
            let name = sanitize_component(&entity.name);
            match archive_entity(&entity_dir, &name, &results, self.config.archive_options()).await {
                Ok(path) => path,
                Err(e) => {
                    error!("{e}");
                    None
                }
            }
        } else {
            None
        };

        Ok(EntityOutcome {
            entry: entity.clone(),
            attempted,
            succeeded,
            archive_path,
        })
    }

    /// Open a session, load the results page and run every strategy. The
    /// session is closed on every path out.
    async fn collect_candidates(
        &self,
        entity: &EntityRecord,
    ) -> Result<Vec<ImageCandidate>, HarvestError> {
        let mut session = SessionManager::new(
            Arc::clone(&self.launcher),
            self.config.session_config(),
            SessionOptions {
                launch_policy: self.config.session_retry_policy(),
                navigation_attempts: self.config.navigation_attempts,
                settle_delay: self.config.settle_delay,
            },
            self.ctx.clone(),
        );

        let url = search_url(&self.config.search_url_template, &entity.name);
        let result = self.extract_from(&mut session, &url).await;
        session.close().await;
        result
    }

    async fn extract_from(
        &self,
        session: &mut SessionManager,
        url: &str,
    ) -> Result<Vec<ImageCandidate>, HarvestError> {
        session.open().await?;
        let page = session.navigate(url).await?;
        let candidates = self.strategies.extract_all(&page, &self.ctx).await;
        info!(raw = candidates.len(), "Extraction finished");
        Ok(candidates)
    }

    fn entity_dir(&self, entity: &EntityRecord) -> PathBuf {
        self.config
            .output_dir
            .join(sanitize_component(&entity.name))
    }
}

/// Whether the run counts as successful: at least one entity, and every
/// entity produced at least one image.
#[must_use]
pub fn run_succeeded(outcomes: &[EntityOutcome]) -> bool {
    !outcomes.is_empty() && outcomes.iter().all(|o| o.succeeded > 0)
}
