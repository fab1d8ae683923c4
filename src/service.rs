//! Service layer tying the store, catalog and job queue together: cooldown
//! policy, queue submission, status projection, and submission ingestion.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::discogs::{Catalog, ReleaseDoc};
use crate::error::EnrichError;
use crate::matcher::{self, MatchOutcome};
use crate::queue::JobQueue;
use crate::scoring::MatchStatus;
use crate::store;

/// Minimum age of the latest attempt before an unforced re-match runs.
pub const COOLDOWN_SECS: i64 = 3600;

pub const SKIP_REASON_COOLDOWN: &str = "cooldown_1h";

/// Tag source for tags carried on ingested submissions.
pub const SOURCE_BANDCAMP: &str = "bandcamp";

/// One scraped submission, as received on the ingestion path.
#[derive(Debug, Clone, Deserialize)]
pub struct Submission {
    pub artist_name: String,
    pub title: String,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub page_url: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Current enrichment state of one release, for status queries.
#[derive(Debug, Clone, Serialize)]
pub struct ReleaseStatus {
    pub artist_name: String,
    pub title: String,
    pub status: String,
    pub confidence_score: Option<i64>,
    pub discogs_release_id: Option<i64>,
    pub discogs_master_id: Option<i64>,
    pub rating_average: Option<f64>,
    pub rating_count: Option<i64>,
    pub last_attempt_at: Option<i64>,
    pub tags: Vec<String>,
}

#[derive(Clone)]
pub struct Enricher {
    store: Arc<Mutex<Connection>>,
    catalog: Arc<dyn Catalog>,
    queue: JobQueue,
}

impl Enricher {
    pub fn new(store: Arc<Mutex<Connection>>, catalog: Arc<dyn Catalog>, queue: JobQueue) -> Self {
        Self {
            store,
            catalog,
            queue,
        }
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, EnrichError> {
        self.store
            .lock()
            .map_err(|_| EnrichError::Fatal("store lock poisoned".into()))
    }

    /// Run a match for one release, honoring the cooldown unless forced.
    ///
    /// A release whose latest durable attempt is younger than the cooldown
    /// is skipped without touching the catalog or the queue; the skip
    /// outcome echoes that attempt's result so callers see the same answer
    /// a fresh run would most likely produce.
    pub async fn trigger_match(&self, release_id: i64, force: bool) -> MatchOutcome {
        if !force {
            match self.cooldown_skip(release_id) {
                Ok(Some(outcome)) => return outcome,
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(release_id, error = %err, "cooldown check failed");
                    return MatchOutcome::rejected(release_id, err.reason());
                }
            }
        }

        let store = Arc::clone(&self.store);
        let catalog = Arc::clone(&self.catalog);
        let handle = self
            .queue
            .enqueue(async move { matcher::run_match(store, catalog, release_id).await });
        match handle.await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(release_id, error = %err, "match job died");
                MatchOutcome::rejected(release_id, "error")
            }
        }
    }

    fn cooldown_skip(&self, release_id: i64) -> Result<Option<MatchOutcome>, EnrichError> {
        let conn = self.conn()?;
        let Some(attempt) = store::latest_match_attempt(&conn, release_id)? else {
            return Ok(None);
        };
        let age = store::unix_now() - attempt.created_at;
        if age >= COOLDOWN_SECS {
            return Ok(None);
        }
        tracing::debug!(release_id, age, "within cooldown, skipping");
        Ok(Some(MatchOutcome {
            release_id,
            status: MatchStatus::parse(&attempt.status).unwrap_or(MatchStatus::Rejected),
            confidence_score: attempt.confidence_score,
            discogs_release_id: attempt.discogs_release_id,
            discogs_master_id: attempt.discogs_master_id,
            skipped: true,
            skip_reason: Some(SKIP_REASON_COOLDOWN.to_string()),
            reason: None,
        }))
    }

    /// Fire-and-forget submission. The watcher resolves once the match job
    /// finishes and always logs what became of it, so background jobs never
    /// fail silently.
    pub fn submit_match(&self, release_id: i64) -> JoinHandle<()> {
        let enricher = self.clone();
        tokio::spawn(async move {
            let outcome = enricher.trigger_match(release_id, false).await;
            match (&outcome.reason, outcome.skipped) {
                (Some(reason), _) => {
                    tracing::warn!(release_id, reason, "background match did not complete")
                }
                (None, true) => tracing::debug!(release_id, "background match skipped"),
                (None, false) => tracing::info!(
                    release_id,
                    status = outcome.status.as_str(),
                    confidence = outcome.confidence_score,
                    "background match finished"
                ),
            }
        })
    }

    /// Upsert a scraped submission and attach its platform tags.
    pub fn ingest_submission(&self, submission: &Submission) -> Result<i64, EnrichError> {
        let conn = self.conn()?;
        let release_id = store::upsert_release(
            &conn,
            submission.artist_name.trim(),
            submission.title.trim(),
            submission.release_date.as_deref(),
            submission.page_url.as_deref(),
        )?;
        for tag in &submission.tags {
            let name = tag.trim();
            if name.is_empty() {
                continue;
            }
            let tag_id = store::ensure_tag(&conn, name)?;
            store::attach_tag(&conn, release_id, tag_id, SOURCE_BANDCAMP)?;
        }
        tracing::info!(
            release_id,
            artist = submission.artist_name.as_str(),
            title = submission.title.as_str(),
            "ingested submission"
        );
        Ok(release_id)
    }

    /// Status projection: the latest attempt decides the status, the
    /// release row carries the enrichment, and the response cache backfills
    /// ratings the row does not have yet. Unknown ids are omitted.
    pub fn get_status(
        &self,
        release_ids: &[i64],
    ) -> Result<BTreeMap<i64, ReleaseStatus>, EnrichError> {
        let conn = self.conn()?;
        let mut out = BTreeMap::new();
        for &release_id in release_ids {
            let Some(release) = store::get_release(&conn, release_id)? else {
                tracing::debug!(release_id, "status requested for unknown release");
                continue;
            };
            let attempt = store::latest_match_attempt(&conn, release_id)?;
            let (status, confidence, last_attempt_at) = match &attempt {
                Some(a) => (a.status.clone(), Some(a.confidence_score), Some(a.created_at)),
                None => ("unmatched".to_string(), None, None),
            };
            // suggestions never write the row pointer, so their candidate
            // ids only exist on the attempt
            let discogs_release_id = attempt
                .as_ref()
                .and_then(|a| a.discogs_release_id)
                .or(release.discogs_release_id);
            let discogs_master_id = attempt
                .as_ref()
                .and_then(|a| a.discogs_master_id)
                .or(release.discogs_master_id);

            let mut rating_average = release.rating_average;
            let mut rating_count = release.rating_count;
            if rating_average.is_none()
                && let Some(pointer) = release.discogs_release_id
                && let Some(entry) =
                    store::get_cache_entry(&conn, pointer, store::ENTITY_RELEASE)?
                && let Ok(doc) = serde_json::from_str::<ReleaseDoc>(&entry.payload_json)
                && let Some(rating) = doc.community.and_then(|c| c.rating)
            {
                rating_average = rating.average;
                rating_count = rating_count.or(rating.count);
            }

            let tags = store::get_release_tags(&conn, release_id)?
                .into_iter()
                .map(|(name, _)| name)
                .collect();

            out.insert(
                release_id,
                ReleaseStatus {
                    artist_name: release.artist_name,
                    title: release.title,
                    status,
                    confidence_score: confidence,
                    discogs_release_id,
                    discogs_master_id,
                    rating_average,
                    rating_count,
                    last_attempt_at,
                    tags,
                },
            );
        }
        Ok(out)
    }
}
