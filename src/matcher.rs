//! The matching flow: candidate search, scoring, hydration, persistence.
//!
//! One invariant governs everything here: only real outcomes become
//! durable. A scored result (matched, suggested, rejected) and a genuine
//! zero-result search each write a match attempt; configuration problems,
//! upstream flakiness and any other error write nothing, so a transient
//! failure can never start a cooldown window or masquerade as "Discogs has
//! never heard of this".

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::Connection;
use serde::Serialize;

use crate::discogs::{Catalog, ReleaseDoc, SearchHit, SearchQuery};
use crate::error::EnrichError;
use crate::scoring::{MatchStatus, artist_candidates, best_hit, decide, title_candidates};
use crate::store::{self, Enrichment};

pub const METHOD_SEARCH: &str = "search_title_artist";
pub const METHOD_REFRESH: &str = "refresh_existing";

/// Cap on search calls per pass over the candidate cross-product.
const MAX_SEARCH_ATTEMPTS: usize = 12;

/// Pause before the single higher-level retry of a temporary failure.
const TEMPORARY_RETRY_DELAY: Duration = Duration::from_secs(6);

/// What one matching run produced, in API shape.
#[derive(Debug, Clone, Serialize)]
pub struct MatchOutcome {
    pub release_id: i64,
    pub status: MatchStatus,
    pub confidence_score: i64,
    pub discogs_release_id: Option<i64>,
    pub discogs_master_id: Option<i64>,
    pub skipped: bool,
    pub skip_reason: Option<String>,
    pub reason: Option<String>,
}

impl MatchOutcome {
    pub fn rejected(release_id: i64, reason: &str) -> Self {
        Self {
            release_id,
            status: MatchStatus::Rejected,
            confidence_score: 0,
            discogs_release_id: None,
            discogs_master_id: None,
            skipped: false,
            skip_reason: None,
            reason: Some(reason.to_string()),
        }
    }
}

fn lock_conn(store: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, EnrichError> {
    store
        .lock()
        .map_err(|_| EnrichError::Fatal("store lock poisoned".into()))
}

/// Retry a temporary failure once after a pause; everything else passes
/// straight through.
async fn with_temporary_retry<T, F, Fut>(op: F) -> Result<T, EnrichError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, EnrichError>>,
{
    match op().await {
        Err(err) if err.is_temporary() => {
            tracing::debug!(error = %err, "temporary failure, retrying once");
            tokio::time::sleep(TEMPORARY_RETRY_DELAY).await;
            op().await
        }
        other => other,
    }
}

fn release_year(release_date: Option<&str>) -> Option<i32> {
    let date = release_date?.trim();
    if date.len() < 4 {
        return None;
    }
    date.get(..4)?.parse().ok()
}

/// Storage-shaped enrichment out of a full release document. Blank strings
/// from sparse payloads are dropped rather than stored.
fn extract_enrichment(doc: &ReleaseDoc) -> Enrichment {
    let clean = |values: &[String]| -> Vec<String> {
        values
            .iter()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect()
    };

    let image = doc
        .images
        .iter()
        .find(|img| img.kind.as_deref() == Some("primary"))
        .or_else(|| doc.images.first());

    let rating = doc.community.as_ref().and_then(|c| c.rating.as_ref());

    Enrichment {
        genres: clean(&doc.genres),
        styles: clean(&doc.styles),
        country: doc
            .country
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string),
        labels: clean(
            &doc.labels
                .iter()
                .map(|l| l.name.clone())
                .collect::<Vec<_>>(),
        ),
        cover_image_url: image.and_then(|img| img.uri.clone()),
        thumb_url: image.and_then(|img| img.uri150.clone()),
        rating_average: rating.and_then(|r| r.average).filter(|a| a.is_finite()),
        rating_count: rating.and_then(|r| r.count),
    }
}

/// Project the document's genres and styles into the shared tag tables.
/// First writer wins per (release, tag); a later source never relabels.
fn project_tags(
    conn: &Connection,
    release_id: i64,
    enrichment: &Enrichment,
) -> Result<(), rusqlite::Error> {
    for genre in &enrichment.genres {
        let tag_id = store::ensure_tag(conn, genre)?;
        store::attach_tag(conn, release_id, tag_id, store::SOURCE_DISCOGS_GENRE)?;
    }
    for style in &enrichment.styles {
        let tag_id = store::ensure_tag(conn, style)?;
        store::attach_tag(conn, release_id, tag_id, store::SOURCE_DISCOGS_STYLE)?;
    }
    Ok(())
}

fn cache_payload<T: Serialize>(
    store: &Mutex<Connection>,
    external_id: i64,
    entity_type: &str,
    payload: &T,
) {
    // best-effort: the cache never blocks a match
    let json = match serde_json::to_string(payload) {
        Ok(json) => json,
        Err(err) => {
            tracing::warn!(external_id, entity_type, error = %err, "cache serialize failed");
            return;
        }
    };
    let result = lock_conn(store)
        .map_err(|e| e.to_string())
        .and_then(|conn| {
            store::upsert_cache_entry(&conn, external_id, entity_type, &json)
                .map_err(|e| e.to_string())
        });
    if let Err(err) = result {
        tracing::warn!(external_id, entity_type, error = %err, "cache write failed");
    }
}

/// Run one matching pass and fold every error into a rejected, non-durable
/// outcome tagged with the error's reason.
pub async fn run_match(
    store: Arc<Mutex<Connection>>,
    catalog: Arc<dyn Catalog>,
    release_id: i64,
) -> MatchOutcome {
    match match_release(&store, catalog.as_ref(), release_id).await {
        Ok(outcome) => outcome,
        Err(err) => {
            tracing::warn!(release_id, reason = err.reason(), error = %err, "match failed");
            MatchOutcome::rejected(release_id, err.reason())
        }
    }
}

async fn match_release(
    store: &Mutex<Connection>,
    catalog: &dyn Catalog,
    release_id: i64,
) -> Result<MatchOutcome, EnrichError> {
    let release = {
        let conn = lock_conn(store)?;
        store::get_release(&conn, release_id)?
    }
    .ok_or_else(|| EnrichError::Fatal(format!("release {release_id} not found")))?;

    if let Some(pointer) = release.discogs_release_id {
        return refresh_existing(store, catalog, &release, pointer).await;
    }

    let artist = release.artist_name.trim().to_string();
    let title = release.title.trim().to_string();
    if artist.is_empty() || title.is_empty() {
        tracing::debug!(release_id, "missing artist or title, nothing to search");
        return Ok(MatchOutcome::rejected(release_id, "missing_fields"));
    }
    let year = release_year(release.release_date.as_deref());

    let artists = artist_candidates(&artist);
    let titles = title_candidates(&title, &artist);
    let mut queries = Vec::new();
    if year.is_some() {
        for a in &artists {
            for t in &titles {
                queries.push(SearchQuery::new(a, t, year));
            }
        }
        queries.truncate(MAX_SEARCH_ATTEMPTS);
    }
    let without_year_start = queries.len();
    for a in &artists {
        for t in &titles {
            queries.push(SearchQuery::new(a, t, None));
        }
    }
    queries.truncate(without_year_start + MAX_SEARCH_ATTEMPTS);

    // the first query returning anything ends the sweep; later queries are
    // progressively looser variants and would only add noise
    let mut hits: Vec<SearchHit> = Vec::new();
    for query in &queries {
        let results = with_temporary_retry(|| catalog.search(query)).await?;
        if !results.is_empty() {
            hits = results;
            break;
        }
    }

    let Some((hit, score)) = best_hit(&artist, &title, year, &hits)
        .map(|(hit, score)| (hit.clone(), score))
    else {
        // genuine zero results across every candidate: durable, cooldown starts
        let now = store::unix_now();
        let conn = lock_conn(store)?;
        store::insert_match_attempt(
            &conn,
            release_id,
            None,
            None,
            0,
            METHOD_SEARCH,
            MatchStatus::Rejected,
            now,
        )?;
        drop(conn);
        tracing::info!(release_id, "no search results");
        return Ok(MatchOutcome::rejected(release_id, "no_results"));
    };

    let status = decide(score);
    let now = store::unix_now();
    {
        let conn = lock_conn(store)?;
        store::insert_match_attempt(
            &conn,
            release_id,
            Some(hit.id),
            hit.master_id,
            score as i64,
            METHOD_SEARCH,
            status,
            now,
        )?;
    }
    tracing::info!(
        release_id,
        discogs_release_id = hit.id,
        score,
        status = status.as_str(),
        "scored best candidate"
    );

    if status != MatchStatus::Rejected {
        cache_payload(store, hit.id, store::ENTITY_SEARCH_RESULT, &hit);
    }

    if status == MatchStatus::Matched {
        hydrate_match(store, catalog, release_id, &hit, score as i64, now).await?;
    }

    Ok(MatchOutcome {
        release_id,
        status,
        confidence_score: score as i64,
        discogs_release_id: Some(hit.id),
        discogs_master_id: hit.master_id,
        skipped: false,
        skip_reason: None,
        reason: None,
    })
}

/// Fetch the full document for an accepted match and merge it in. Hydration
/// failure degrades to a pointer-only write: the match itself already
/// happened and must not be lost to a flaky follow-up fetch.
async fn hydrate_match(
    store: &Mutex<Connection>,
    catalog: &dyn Catalog,
    release_id: i64,
    hit: &SearchHit,
    confidence: i64,
    now: i64,
) -> Result<(), EnrichError> {
    match with_temporary_retry(|| catalog.get_release(hit.id)).await {
        Ok(doc) => {
            cache_payload(store, doc.id, store::ENTITY_RELEASE, &doc);
            let enrichment = extract_enrichment(&doc);
            let conn = lock_conn(store)?;
            store::apply_enrichment(
                &conn,
                release_id,
                hit.id,
                hit.master_id.or(doc.master_id),
                confidence,
                &enrichment,
                now,
            )?;
            project_tags(&conn, release_id, &enrichment)?;
        }
        Err(err) => {
            tracing::warn!(
                release_id,
                discogs_release_id = hit.id,
                error = %err,
                "hydration failed, keeping pointer only"
            );
            let conn = lock_conn(store)?;
            store::set_match_pointer(&conn, release_id, hit.id, hit.master_id, confidence, now)?;
        }
    }
    Ok(())
}

/// Fast path for a release that already carries a pointer: skip searching,
/// refetch the known document, merge, and record a refresh attempt.
async fn refresh_existing(
    store: &Mutex<Connection>,
    catalog: &dyn Catalog,
    release: &store::Release,
    pointer: i64,
) -> Result<MatchOutcome, EnrichError> {
    let doc = with_temporary_retry(|| catalog.get_release(pointer)).await?;
    cache_payload(store, doc.id, store::ENTITY_RELEASE, &doc);

    let confidence = release.discogs_confidence.unwrap_or(100);
    let master_id = release.discogs_master_id.or(doc.master_id);
    let enrichment = extract_enrichment(&doc);
    let now = store::unix_now();

    let conn = lock_conn(store)?;
    store::apply_enrichment(
        &conn,
        release.release_id,
        pointer,
        master_id,
        confidence,
        &enrichment,
        now,
    )?;
    project_tags(&conn, release.release_id, &enrichment)?;
    store::insert_match_attempt(
        &conn,
        release.release_id,
        Some(pointer),
        master_id,
        confidence,
        METHOD_REFRESH,
        MatchStatus::Matched,
        now,
    )?;
    drop(conn);

    tracing::info!(
        release_id = release.release_id,
        discogs_release_id = pointer,
        "refreshed existing match"
    );
    Ok(MatchOutcome {
        release_id: release.release_id,
        status: MatchStatus::Matched,
        confidence_score: confidence,
        discogs_release_id: Some(pointer),
        discogs_master_id: master_id,
        skipped: false,
        skip_reason: None,
        reason: None,
    })
}
