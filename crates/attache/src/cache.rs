//! Cache identifiers and cache housekeeping.
//!
//! A cache id names one staging attempt: `YYYYMMDD-HHMM-<pid>-<random>`. The
//! embedded timestamp and process id make collisions between concurrent
//! uploads unlikely without any global coordination, and let housekeeping
//! judge an entry's age from its name alone.

use std::path::Path;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use rand::Rng;
use regex::Regex;
use tokio::fs;

use crate::error::{UploadError, UploadResult};

static CACHE_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{8}-\d{4}-\d+-\d{4}$").expect("pattern compiles"));

const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M";

/// Identifier for one cache staging attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheId(String);

impl CacheId {
    /// Generate a fresh cache id from the current time, the process id and a
    /// random component.
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        CacheId(format!(
            "{}-{}-{:04}",
            Utc::now().format(TIMESTAMP_FORMAT),
            std::process::id(),
            rng.random_range(0..10_000)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The minute-resolution timestamp embedded in the id.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        let stamp = self.0.get(..13)?;
        NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT)
            .ok()
            .map(|naive| naive.and_utc())
    }
}

impl FromStr for CacheId {
    type Err = UploadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if CACHE_ID_PATTERN.is_match(s) {
            Ok(CacheId(s.to_string()))
        } else {
            Err(UploadError::invalid("cache id", s))
        }
    }
}

impl std::fmt::Display for CacheId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Delete cache entries older than `cutoff` from a resolved cache directory.
///
/// Entry names that do not parse as cache ids are left alone, as is anything
/// newer than the cutoff. Returns the number of entries removed. A missing
/// cache directory counts as already clean.
pub async fn clean_cache(cache_dir: &Path, cutoff: DateTime<Utc>) -> UploadResult<usize> {
    if !fs::try_exists(cache_dir).await.unwrap_or(false) {
        return Ok(0);
    }

    let mut removed = 0usize;
    let mut entries = fs::read_dir(cache_dir).await.map_err(io_err)?;
    while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let Ok(cache_id) = name.parse::<CacheId>() else {
            continue;
        };
        let Some(stamp) = cache_id.timestamp() else {
            continue;
        };
        if stamp < cutoff {
            fs::remove_dir_all(entry.path()).await.map_err(io_err)?;
            removed += 1;
        }
    }

    if removed > 0 {
        tracing::info!(
            cache_dir = %cache_dir.display(),
            removed,
            "Stale cache entries removed"
        );
    }
    Ok(removed)
}

fn io_err(err: std::io::Error) -> UploadError {
    UploadError::File(attache_core::FileError::Io(err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::tempdir;

    #[test]
    fn test_generated_ids_are_valid() {
        for _ in 0..32 {
            let id = CacheId::generate();
            assert!(
                id.as_str().parse::<CacheId>().is_ok(),
                "generated id {:?} failed validation",
                id.as_str()
            );
        }
    }

    #[test]
    fn test_parse_rejects_malformed_ids() {
        for bad in [
            "",
            "nonsense",
            "20260822-1015-1234",
            "2026082-1015-99-0042",
            "20260822-1015-99-042",
            "20260822-1015--0042",
            "20260822/1015-99-0042",
            "../../../etc",
        ] {
            assert!(
                bad.parse::<CacheId>().is_err(),
                "expected rejection for {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_parse_accepts_canonical_ids() {
        let id: CacheId = "20260822-1015-99187-0042".parse().expect("valid");
        assert_eq!(id.as_str(), "20260822-1015-99187-0042");
    }

    #[test]
    fn test_timestamp_extraction() {
        let id: CacheId = "20260822-1015-99-0042".parse().expect("valid");
        let stamp = id.timestamp().expect("timestamp parses");
        assert_eq!(stamp.to_rfc3339(), "2026-08-22T10:15:00+00:00");
    }

    #[tokio::test]
    async fn test_clean_cache_removes_only_stale_parseable_entries() {
        let dir = tempdir().expect("tempdir");

        let stale = dir.path().join("20200101-0000-42-1111");
        let fresh = CacheId::generate();
        let fresh_dir = dir.path().join(fresh.as_str());
        let foreign = dir.path().join("not-a-cache-id");
        for d in [&stale, &fresh_dir, &foreign] {
            std::fs::create_dir_all(d).expect("mkdir");
            std::fs::write(d.join("file.txt"), b"x").expect("write");
        }

        let cutoff = Utc::now() - Duration::hours(1);
        let removed = clean_cache(dir.path(), cutoff).await.expect("clean");

        assert_eq!(removed, 1);
        assert!(!stale.exists());
        assert!(fresh_dir.exists());
        assert!(foreign.exists());
    }

    #[tokio::test]
    async fn test_clean_cache_missing_dir_is_clean() {
        let removed = clean_cache(Path::new("/no/such/cache/dir"), Utc::now())
            .await
            .expect("clean");
        assert_eq!(removed, 0);
    }
}
