//! SQLite persistence: releases, append-only match attempts, the raw
//! Discogs response cache, and the shared tag tables.
//!
//! All writes are independent per-statement operations. The matching flow
//! deliberately has no wrapping transaction: partial completion is handled
//! by the pointer-fallback update, not rollback.

use rusqlite::{Connection, OpenFlags, ffi, params};
use std::path::PathBuf;

use crate::scoring::MatchStatus;

pub const ENTITY_SEARCH_RESULT: &str = "search_result";
pub const ENTITY_RELEASE: &str = "release";
pub const ENTITY_MASTER: &str = "master";

pub const SOURCE_DISCOGS_GENRE: &str = "discogs_genre";
pub const SOURCE_DISCOGS_STYLE: &str = "discogs_style";

pub fn default_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("waxline")
        .join("waxline.sqlite3")
}

pub fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

pub fn open(path: &str) -> Result<Connection, rusqlite::Error> {
    let store_path = std::path::Path::new(path);
    if let Some(parent) = store_path.parent() {
        std::fs::create_dir_all(parent).map_err(|err| {
            rusqlite::Error::SqliteFailure(
                ffi::Error::new(ffi::SQLITE_CANTOPEN),
                Some(format!(
                    "failed to create parent directory {} for {}: {}",
                    parent.display(),
                    store_path.display(),
                    err
                )),
            )
        })?;
    }
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
    )?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    migrate(&conn)?;
    Ok(conn)
}

fn migrate(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS releases (
            release_id         INTEGER PRIMARY KEY AUTOINCREMENT,
            artist_name        TEXT NOT NULL,
            title              TEXT NOT NULL,
            release_date       TEXT,
            page_url           TEXT UNIQUE,
            discogs_release_id INTEGER,
            discogs_master_id  INTEGER,
            discogs_confidence INTEGER,
            genres             TEXT,
            styles             TEXT,
            country            TEXT,
            labels             TEXT,
            cover_image_url    TEXT,
            thumb_url          TEXT,
            rating_average     REAL,
            rating_count       INTEGER,
            matched_at         INTEGER,
            last_refreshed_at  INTEGER,
            created_at         TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE TABLE IF NOT EXISTS match_attempts (
            id                 INTEGER PRIMARY KEY AUTOINCREMENT,
            release_id         INTEGER NOT NULL REFERENCES releases(release_id) ON DELETE CASCADE,
            discogs_release_id INTEGER,
            discogs_master_id  INTEGER,
            confidence_score   INTEGER NOT NULL,
            match_method       TEXT NOT NULL,
            status             TEXT NOT NULL,
            created_at         INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_match_attempts_release
            ON match_attempts(release_id, created_at);
        CREATE TABLE IF NOT EXISTS discogs_cache (
            external_id    INTEGER NOT NULL,
            entity_type    TEXT NOT NULL,
            payload_json   TEXT NOT NULL,
            last_synced_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (external_id, entity_type)
        );
        CREATE TABLE IF NOT EXISTS tags (
            id   INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE
        );
        CREATE TABLE IF NOT EXISTS release_tags (
            release_id INTEGER NOT NULL REFERENCES releases(release_id) ON DELETE CASCADE,
            tag_id     INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
            source     TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (release_id, tag_id)
        );
        PRAGMA user_version = 1;",
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Releases
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Release {
    pub release_id: i64,
    pub artist_name: String,
    pub title: String,
    pub release_date: Option<String>,
    pub page_url: Option<String>,
    pub discogs_release_id: Option<i64>,
    pub discogs_master_id: Option<i64>,
    pub discogs_confidence: Option<i64>,
    pub genres: Option<String>,
    pub styles: Option<String>,
    pub country: Option<String>,
    pub labels: Option<String>,
    pub cover_image_url: Option<String>,
    pub thumb_url: Option<String>,
    pub rating_average: Option<f64>,
    pub rating_count: Option<i64>,
    pub matched_at: Option<i64>,
    pub last_refreshed_at: Option<i64>,
}

const RELEASE_COLUMNS: &str = "release_id, artist_name, title, release_date, page_url, \
     discogs_release_id, discogs_master_id, discogs_confidence, genres, styles, country, \
     labels, cover_image_url, thumb_url, rating_average, rating_count, matched_at, \
     last_refreshed_at";

fn map_release(row: &rusqlite::Row) -> Result<Release, rusqlite::Error> {
    Ok(Release {
        release_id: row.get(0)?,
        artist_name: row.get(1)?,
        title: row.get(2)?,
        release_date: row.get(3)?,
        page_url: row.get(4)?,
        discogs_release_id: row.get(5)?,
        discogs_master_id: row.get(6)?,
        discogs_confidence: row.get(7)?,
        genres: row.get(8)?,
        styles: row.get(9)?,
        country: row.get(10)?,
        labels: row.get(11)?,
        cover_image_url: row.get(12)?,
        thumb_url: row.get(13)?,
        rating_average: row.get(14)?,
        rating_count: row.get(15)?,
        matched_at: row.get(16)?,
        last_refreshed_at: row.get(17)?,
    })
}

pub fn get_release(conn: &Connection, release_id: i64) -> Result<Option<Release>, rusqlite::Error> {
    let sql = format!("SELECT {RELEASE_COLUMNS} FROM releases WHERE release_id = ?1");
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query_map(params![release_id], map_release)?;
    match rows.next() {
        Some(Ok(entry)) => Ok(Some(entry)),
        Some(Err(e)) => Err(e),
        None => Ok(None),
    }
}

/// Upsert from the ingestion path. Submissions carrying a page URL are keyed
/// on it so re-scrapes of the same page update in place; URL-less
/// submissions always insert. Never touches enrichment columns.
pub fn upsert_release(
    conn: &Connection,
    artist_name: &str,
    title: &str,
    release_date: Option<&str>,
    page_url: Option<&str>,
) -> Result<i64, rusqlite::Error> {
    match page_url {
        Some(url) => conn.query_row(
            "INSERT INTO releases (artist_name, title, release_date, page_url)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(page_url) DO UPDATE SET
                 artist_name = ?1,
                 title = ?2,
                 release_date = COALESCE(?3, release_date)
             RETURNING release_id",
            params![artist_name, title, release_date, url],
            |row| row.get(0),
        ),
        None => {
            conn.execute(
                "INSERT INTO releases (artist_name, title, release_date)
                 VALUES (?1, ?2, ?3)",
                params![artist_name, title, release_date],
            )?;
            Ok(conn.last_insert_rowid())
        }
    }
}

/// Enrichment payload in storage shape. Array fields serialize to JSON text
/// columns; empty arrays count as "nothing new" and never erase stored data.
#[derive(Debug, Clone, Default)]
pub struct Enrichment {
    pub genres: Vec<String>,
    pub styles: Vec<String>,
    pub country: Option<String>,
    pub labels: Vec<String>,
    pub cover_image_url: Option<String>,
    pub thumb_url: Option<String>,
    pub rating_average: Option<f64>,
    pub rating_count: Option<i64>,
}

fn to_json_array(values: &[String]) -> Option<String> {
    if values.is_empty() {
        None
    } else {
        serde_json::to_string(values).ok()
    }
}

/// Merge-not-overwrite write of a match plus its hydrated payload. Every
/// enrichment column only moves null → value (COALESCE), so a thin payload
/// or failed refresh never erases previously known richer data.
pub fn apply_enrichment(
    conn: &Connection,
    release_id: i64,
    discogs_release_id: i64,
    discogs_master_id: Option<i64>,
    confidence: i64,
    enrichment: &Enrichment,
    now: i64,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "UPDATE releases SET
            discogs_release_id = ?2,
            discogs_master_id  = COALESCE(?3, discogs_master_id),
            discogs_confidence = ?4,
            genres             = COALESCE(?5, genres),
            styles             = COALESCE(?6, styles),
            country            = COALESCE(?7, country),
            labels             = COALESCE(?8, labels),
            cover_image_url    = COALESCE(?9, cover_image_url),
            thumb_url          = COALESCE(?10, thumb_url),
            rating_average     = COALESCE(?11, rating_average),
            rating_count       = COALESCE(?12, rating_count),
            matched_at         = COALESCE(matched_at, ?13),
            last_refreshed_at  = ?13
         WHERE release_id = ?1",
        params![
            release_id,
            discogs_release_id,
            discogs_master_id,
            confidence,
            to_json_array(&enrichment.genres),
            to_json_array(&enrichment.styles),
            enrichment.country,
            to_json_array(&enrichment.labels),
            enrichment.cover_image_url,
            enrichment.thumb_url,
            enrichment.rating_average,
            enrichment.rating_count,
            now,
        ],
    )?;
    Ok(())
}

/// Minimal fallback when hydration fails after a match was accepted:
/// pointer IDs, confidence and matched-at only, so the release is never
/// left between "has match" and "has no match".
pub fn set_match_pointer(
    conn: &Connection,
    release_id: i64,
    discogs_release_id: i64,
    discogs_master_id: Option<i64>,
    confidence: i64,
    now: i64,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "UPDATE releases SET
            discogs_release_id = ?2,
            discogs_master_id  = COALESCE(?3, discogs_master_id),
            discogs_confidence = ?4,
            matched_at         = COALESCE(matched_at, ?5)
         WHERE release_id = ?1",
        params![
            release_id,
            discogs_release_id,
            discogs_master_id,
            confidence,
            now
        ],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Match attempts (append-only)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MatchAttempt {
    pub id: i64,
    pub release_id: i64,
    pub discogs_release_id: Option<i64>,
    pub discogs_master_id: Option<i64>,
    pub confidence_score: i64,
    pub match_method: String,
    pub status: String,
    pub created_at: i64,
}

pub fn insert_match_attempt(
    conn: &Connection,
    release_id: i64,
    discogs_release_id: Option<i64>,
    discogs_master_id: Option<i64>,
    confidence_score: i64,
    match_method: &str,
    status: MatchStatus,
    created_at: i64,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO match_attempts
            (release_id, discogs_release_id, discogs_master_id, confidence_score,
             match_method, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            release_id,
            discogs_release_id,
            discogs_master_id,
            confidence_score,
            match_method,
            status.as_str(),
            created_at
        ],
    )?;
    Ok(())
}

fn map_match_attempt(row: &rusqlite::Row) -> Result<MatchAttempt, rusqlite::Error> {
    Ok(MatchAttempt {
        id: row.get(0)?,
        release_id: row.get(1)?,
        discogs_release_id: row.get(2)?,
        discogs_master_id: row.get(3)?,
        confidence_score: row.get(4)?,
        match_method: row.get(5)?,
        status: row.get(6)?,
        created_at: row.get(7)?,
    })
}

/// The most recent attempt is authoritative for status display and the
/// cooldown decision.
pub fn latest_match_attempt(
    conn: &Connection,
    release_id: i64,
) -> Result<Option<MatchAttempt>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT id, release_id, discogs_release_id, discogs_master_id, confidence_score,
                match_method, status, created_at
         FROM match_attempts
         WHERE release_id = ?1
         ORDER BY created_at DESC, id DESC
         LIMIT 1",
    )?;
    let mut rows = stmt.query_map(params![release_id], map_match_attempt)?;
    match rows.next() {
        Some(Ok(entry)) => Ok(Some(entry)),
        Some(Err(e)) => Err(e),
        None => Ok(None),
    }
}

pub fn count_match_attempts(
    conn: &Connection,
    release_id: i64,
) -> Result<i64, rusqlite::Error> {
    conn.query_row(
        "SELECT COUNT(*) FROM match_attempts WHERE release_id = ?1",
        params![release_id],
        |row| row.get(0),
    )
}

// ---------------------------------------------------------------------------
// Raw response cache
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub external_id: i64,
    pub entity_type: String,
    pub payload_json: String,
    pub last_synced_at: String,
}

/// Refreshed on every successful fetch. Performance/debug cache only,
/// never authoritative for release state.
pub fn upsert_cache_entry(
    conn: &Connection,
    external_id: i64,
    entity_type: &str,
    payload_json: &str,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO discogs_cache (external_id, entity_type, payload_json)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(external_id, entity_type)
         DO UPDATE SET payload_json = ?3, last_synced_at = datetime('now')",
        params![external_id, entity_type, payload_json],
    )?;
    Ok(())
}

pub fn get_cache_entry(
    conn: &Connection,
    external_id: i64,
    entity_type: &str,
) -> Result<Option<CacheEntry>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT external_id, entity_type, payload_json, last_synced_at
         FROM discogs_cache
         WHERE external_id = ?1 AND entity_type = ?2",
    )?;
    let mut rows = stmt.query_map(params![external_id, entity_type], |row| {
        Ok(CacheEntry {
            external_id: row.get(0)?,
            entity_type: row.get(1)?,
            payload_json: row.get(2)?,
            last_synced_at: row.get(3)?,
        })
    })?;
    match rows.next() {
        Some(Ok(entry)) => Ok(Some(entry)),
        Some(Err(e)) => Err(e),
        None => Ok(None),
    }
}

// ---------------------------------------------------------------------------
// Tags
// ---------------------------------------------------------------------------

/// Create-if-absent by exact (case-sensitive) name; returns the tag id.
pub fn ensure_tag(conn: &Connection, name: &str) -> Result<i64, rusqlite::Error> {
    conn.execute(
        "INSERT OR IGNORE INTO tags (name) VALUES (?1)",
        params![name],
    )?;
    conn.query_row("SELECT id FROM tags WHERE name = ?1", params![name], |row| {
        row.get(0)
    })
}

/// Idempotent attachment, unique per (release, tag) regardless of source:
/// the first writer wins and its source is never overwritten.
pub fn attach_tag(
    conn: &Connection,
    release_id: i64,
    tag_id: i64,
    source: &str,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT OR IGNORE INTO release_tags (release_id, tag_id, source)
         VALUES (?1, ?2, ?3)",
        params![release_id, tag_id, source],
    )?;
    Ok(())
}

/// (tag name, source) pairs for one release, in attachment order.
pub fn get_release_tags(
    conn: &Connection,
    release_id: i64,
) -> Result<Vec<(String, String)>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT t.name, rt.source
         FROM release_tags rt
         JOIN tags t ON t.id = rt.tag_id
         WHERE rt.release_id = ?1
         ORDER BY rt.rowid",
    )?;
    let rows = stmt.query_map(params![release_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    rows.collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::MatchStatus;

    fn open_temp_store() -> (tempfile::TempDir, Connection) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.sqlite3");
        let conn = open(path.to_str().unwrap()).unwrap();
        (dir, conn)
    }

    fn seed_release(conn: &Connection) -> i64 {
        upsert_release(
            conn,
            "Boards of Canada",
            "Geogaddi",
            Some("2002-02-18"),
            Some("https://boc.bandcamp.com/album/geogaddi"),
        )
        .unwrap()
    }

    #[test]
    fn open_creates_schema() {
        let (_dir, conn) = open_temp_store();
        let version: i32 = conn
            .pragma_query_value(None, "user_version", |r| r.get(0))
            .unwrap();
        assert_eq!(version, 1);

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert!(tables.contains(&"releases".to_string()));
        assert!(tables.contains(&"match_attempts".to_string()));
        assert!(tables.contains(&"discogs_cache".to_string()));
        assert!(tables.contains(&"tags".to_string()));
        assert!(tables.contains(&"release_tags".to_string()));
    }

    #[test]
    fn open_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.sqlite3");
        let path_str = path.to_str().unwrap();

        let conn1 = open(path_str).unwrap();
        drop(conn1);
        let conn2 = open(path_str).unwrap();
        let version: i32 = conn2
            .pragma_query_value(None, "user_version", |r| r.get(0))
            .unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn upsert_release_keys_on_page_url() {
        let (_dir, conn) = open_temp_store();
        let id1 = seed_release(&conn);
        let id2 = upsert_release(
            &conn,
            "Boards Of Canada",
            "Geogaddi",
            None,
            Some("https://boc.bandcamp.com/album/geogaddi"),
        )
        .unwrap();
        assert_eq!(id1, id2, "same page URL must update in place");

        let release = get_release(&conn, id1).unwrap().unwrap();
        assert_eq!(release.artist_name, "Boards Of Canada");
        // null release_date in the re-submission keeps the stored one
        assert_eq!(release.release_date.as_deref(), Some("2002-02-18"));
    }

    #[test]
    fn upsert_release_without_url_always_inserts() {
        let (_dir, conn) = open_temp_store();
        let id1 = upsert_release(&conn, "Burial", "Untrue", None, None).unwrap();
        let id2 = upsert_release(&conn, "Burial", "Untrue", None, None).unwrap();
        assert_ne!(id1, id2);
    }

    #[test]
    fn apply_enrichment_merges_without_overwriting() {
        let (_dir, conn) = open_temp_store();
        let id = seed_release(&conn);

        let first = Enrichment {
            genres: vec!["Electronic".to_string()],
            styles: vec!["IDM".to_string()],
            country: Some("UK".to_string()),
            cover_image_url: Some("https://img.discogs.com/full.jpg".to_string()),
            ..Default::default()
        };
        apply_enrichment(&conn, id, 7042, Some(1124), 80, &first, 1_000).unwrap();

        // Second hydration carries nothing new: empty arrays and nulls.
        apply_enrichment(&conn, id, 7042, None, 80, &Enrichment::default(), 2_000).unwrap();

        let release = get_release(&conn, id).unwrap().unwrap();
        assert_eq!(release.discogs_release_id, Some(7042));
        assert_eq!(release.discogs_master_id, Some(1124));
        assert_eq!(release.genres.as_deref(), Some(r#"["Electronic"]"#));
        assert_eq!(release.styles.as_deref(), Some(r#"["IDM"]"#));
        assert_eq!(release.country.as_deref(), Some("UK"));
        assert_eq!(
            release.cover_image_url.as_deref(),
            Some("https://img.discogs.com/full.jpg")
        );
        assert_eq!(release.matched_at, Some(1_000), "matched_at is first-write");
        assert_eq!(release.last_refreshed_at, Some(2_000));
    }

    #[test]
    fn apply_enrichment_fills_previously_null_fields() {
        let (_dir, conn) = open_temp_store();
        let id = seed_release(&conn);

        apply_enrichment(&conn, id, 7042, None, 80, &Enrichment::default(), 1_000).unwrap();
        let richer = Enrichment {
            rating_average: Some(4.43),
            rating_count: Some(1210),
            ..Default::default()
        };
        apply_enrichment(&conn, id, 7042, Some(1124), 80, &richer, 2_000).unwrap();

        let release = get_release(&conn, id).unwrap().unwrap();
        assert_eq!(release.rating_average, Some(4.43));
        assert_eq!(release.rating_count, Some(1210));
        assert_eq!(release.discogs_master_id, Some(1124));
    }

    #[test]
    fn set_match_pointer_writes_minimal_fields() {
        let (_dir, conn) = open_temp_store();
        let id = seed_release(&conn);

        set_match_pointer(&conn, id, 7042, Some(1124), 80, 1_000).unwrap();

        let release = get_release(&conn, id).unwrap().unwrap();
        assert_eq!(release.discogs_release_id, Some(7042));
        assert_eq!(release.discogs_master_id, Some(1124));
        assert_eq!(release.discogs_confidence, Some(80));
        assert_eq!(release.matched_at, Some(1_000));
        assert!(release.genres.is_none());
        assert!(release.last_refreshed_at.is_none());
    }

    #[test]
    fn match_attempts_accumulate_and_latest_wins() {
        let (_dir, conn) = open_temp_store();
        let id = seed_release(&conn);

        insert_match_attempt(
            &conn,
            id,
            None,
            None,
            0,
            "search_title_artist",
            MatchStatus::Rejected,
            1_000,
        )
        .unwrap();
        insert_match_attempt(
            &conn,
            id,
            Some(7042),
            Some(1124),
            80,
            "search_title_artist",
            MatchStatus::Matched,
            2_000,
        )
        .unwrap();

        assert_eq!(count_match_attempts(&conn, id).unwrap(), 2);

        let latest = latest_match_attempt(&conn, id).unwrap().unwrap();
        assert_eq!(latest.status, "matched");
        assert_eq!(latest.confidence_score, 80);
        assert_eq!(latest.discogs_release_id, Some(7042));
        assert_eq!(latest.created_at, 2_000);
    }

    #[test]
    fn latest_attempt_breaks_timestamp_ties_by_id() {
        let (_dir, conn) = open_temp_store();
        let id = seed_release(&conn);

        insert_match_attempt(
            &conn,
            id,
            None,
            None,
            0,
            "search_title_artist",
            MatchStatus::Rejected,
            1_000,
        )
        .unwrap();
        insert_match_attempt(
            &conn,
            id,
            Some(1),
            None,
            60,
            "search_title_artist",
            MatchStatus::Suggested,
            1_000,
        )
        .unwrap();

        let latest = latest_match_attempt(&conn, id).unwrap().unwrap();
        assert_eq!(latest.status, "suggested");
    }

    #[test]
    fn latest_attempt_missing_is_none() {
        let (_dir, conn) = open_temp_store();
        let id = seed_release(&conn);
        assert!(latest_match_attempt(&conn, id).unwrap().is_none());
    }

    #[test]
    fn cache_upserts_refresh_payload() {
        let (_dir, conn) = open_temp_store();

        upsert_cache_entry(&conn, 7042, ENTITY_SEARCH_RESULT, r#"{"old":true}"#).unwrap();
        upsert_cache_entry(&conn, 7042, ENTITY_SEARCH_RESULT, r#"{"new":true}"#).unwrap();
        upsert_cache_entry(&conn, 7042, ENTITY_RELEASE, r#"{"full":true}"#).unwrap();

        let entry = get_cache_entry(&conn, 7042, ENTITY_SEARCH_RESULT)
            .unwrap()
            .unwrap();
        assert_eq!(entry.payload_json, r#"{"new":true}"#);
        assert!(!entry.last_synced_at.is_empty());

        let release_entry = get_cache_entry(&conn, 7042, ENTITY_RELEASE).unwrap().unwrap();
        assert_eq!(release_entry.payload_json, r#"{"full":true}"#);

        assert!(get_cache_entry(&conn, 9999, ENTITY_MASTER).unwrap().is_none());
    }

    #[test]
    fn ensure_tag_is_create_if_absent_and_case_sensitive() {
        let (_dir, conn) = open_temp_store();

        let id1 = ensure_tag(&conn, "Techno").unwrap();
        let id2 = ensure_tag(&conn, "Techno").unwrap();
        let id3 = ensure_tag(&conn, "techno").unwrap();
        assert_eq!(id1, id2);
        assert_ne!(id1, id3);
    }

    #[test]
    fn tag_attachment_first_writer_wins() {
        let (_dir, conn) = open_temp_store();
        let release = seed_release(&conn);
        let tag = ensure_tag(&conn, "Electronic").unwrap();

        attach_tag(&conn, release, tag, SOURCE_DISCOGS_GENRE).unwrap();
        attach_tag(&conn, release, tag, "user").unwrap();

        let tags = get_release_tags(&conn, release).unwrap();
        assert_eq!(
            tags,
            vec![("Electronic".to_string(), SOURCE_DISCOGS_GENRE.to_string())],
            "second attachment must not overwrite the original source"
        );
    }

    #[test]
    fn attachments_for_different_tags_coexist() {
        let (_dir, conn) = open_temp_store();
        let release = seed_release(&conn);
        let genre = ensure_tag(&conn, "Electronic").unwrap();
        let style = ensure_tag(&conn, "IDM").unwrap();

        attach_tag(&conn, release, genre, SOURCE_DISCOGS_GENRE).unwrap();
        attach_tag(&conn, release, style, SOURCE_DISCOGS_STYLE).unwrap();

        let tags = get_release_tags(&conn, release).unwrap();
        assert_eq!(tags.len(), 2);
    }
}
