//! Snapshot-and-diff of the DB2 authorization catalogs
//!
//! check-db2-security is the one script in the family with state: every run
//! it captures the fourteen `SYSCAT.*AUTH` views, compares each against the
//! copy kept from the previous run, and reports which categories changed.
//! The captures and a change-history log live in a
//! [`BaselineStore`](struct.BaselineStore.html), one directory per
//! (instance home, database) pair under the history root.
//!
//! The store is committed unconditionally once a full capture cycle
//! succeeds: the new captures become the baseline for the next run whether
//! or not anything changed. It never commits partially; a connection or
//! capture failure leaves the previous baseline exactly as it was. The store
//! does no locking of its own, serialization of runs against the same pair
//! is the job of the [`guard`](../guard/index.html) module.

use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use derive_more::From;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::db2::{validate_instance_home, CatalogSource, Db2Error, AUTH_CATEGORIES};
use crate::Status;

/// Errors reading or writing the baseline store
#[derive(Debug, From)]
pub enum StoreError {
    /// Errors originating in IO
    Io(io::Error),
    /// A history record would not serialize
    History(serde_json::Error),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "baseline store error: {}", e),
            StoreError::History(e) => write!(f, "history record error: {}", e),
        }
    }
}

/// Anything that can go wrong during one check run
#[derive(Debug, From)]
pub enum CheckError {
    Db2(Db2Error),
    Store(StoreError),
}

impl std::fmt::Display for CheckError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            CheckError::Db2(e) => write!(f, "{}", e),
            CheckError::Store(e) => write!(f, "{}", e),
        }
    }
}

/// All the knobs of one check-db2-security run
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub instance_home: PathBuf,
    pub database: String,
    pub history_root: PathBuf,
    pub warn: u32,
    pub crit: u32,
}

impl SecurityConfig {
    /// Threshold sanity: both positive, warning below critical
    ///
    /// The thresholds are part of the family-wide CLI surface; the outcome of
    /// the diff does not depend on them (any change is a WARNING), but
    /// nonsensical values are still a usage error.
    pub fn validate(&self) -> Result<(), String> {
        if self.warn == 0 || self.crit == 0 {
            return Err("thresholds must be greater than zero".to_owned());
        }
        if self.warn >= self.crit {
            return Err(format!(
                "warning threshold {} must be below critical threshold {}",
                self.warn, self.crit
            ));
        }
        Ok(())
    }
}

/// One line of the change-history log
///
/// Appended per tracked category per run, changed or not. The digest lets an
/// operator correlate "when did this category last change" without keeping
/// every historical capture around.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub timestamp: DateTime<Utc>,
    pub object: String,
    pub changed: bool,
    pub digest: String,
}

const HISTORY_FILE: &str = "history.log";

/// The per-(instance, database) directory of captures plus history
#[derive(Debug)]
pub struct BaselineStore {
    dir: PathBuf,
    fresh: bool,
}

impl BaselineStore {
    /// The deterministic store location for an (instance home, database) pair
    ///
    /// Repeated runs for the same pair must always land in the same
    /// directory, so the key is the instance home with its separators
    /// flattened plus the upper-cased database name.
    pub fn store_dir(history_root: &Path, instance_home: &Path, database: &str) -> PathBuf {
        let flat_home = instance_home
            .to_string_lossy()
            .trim_matches('/')
            .replace('/', "_");
        history_root.join(format!("{}_{}", flat_home, database.to_uppercase()))
    }

    /// Open the store for a pair, creating it on first use
    pub fn open(
        history_root: &Path,
        instance_home: &Path,
        database: &str,
    ) -> Result<BaselineStore, StoreError> {
        let dir = Self::store_dir(history_root, instance_home, database);
        let fresh = !dir.is_dir();
        if fresh {
            info!("creating baseline store {}", dir.display());
            fs::create_dir_all(&dir)?;
        }
        Ok(BaselineStore { dir, fresh })
    }

    /// True if this store was created by this run
    pub fn is_fresh(&self) -> bool {
        self.fresh
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn capture_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.auth", name))
    }

    /// The capture committed for `name` by the previous run, if any
    pub fn previous(&self, name: &str) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.capture_path(name)) {
            Ok(text) => Ok(Some(text)),
            Err(ref e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Make `captures` the new baseline and append their history records
    pub fn commit(
        &self,
        captures: &[(&'static str, String)],
        records: &[HistoryRecord],
    ) -> Result<(), StoreError> {
        for (name, text) in captures {
            fs::write(self.capture_path(name), text)?;
        }
        let mut history = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(HISTORY_FILE))?;
        for record in records {
            let line = serde_json::to_string(record)?;
            writeln!(history, "{}", line)?;
        }
        Ok(())
    }

    /// Every history record committed so far, oldest first
    pub fn history(&self) -> Result<Vec<HistoryRecord>, StoreError> {
        let raw = match fs::read_to_string(self.dir.join(HISTORY_FILE)) {
            Ok(raw) => raw,
            Err(ref e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut records = Vec::new();
        for line in raw.lines().filter(|l| !l.trim().is_empty()) {
            records.push(serde_json::from_str(line)?);
        }
        Ok(records)
    }
}

/// What one run of the snapshot-diff monitor found
#[derive(Debug)]
pub struct SecurityReport {
    pub status: Status,
    pub summary: String,
    /// The `Changes` perfdata value: 0 on the first run, 1 when nothing
    /// changed, 1 plus the number of changed categories otherwise
    pub changes: i64,
    pub changed: Vec<&'static str>,
    pub first_run: bool,
}

impl SecurityReport {
    /// The second output line: per-run detail about the categories
    pub fn long_text(&self) -> String {
        if self.first_run {
            format!("baseline created for {} categories", AUTH_CATEGORIES.len())
        } else if self.changed.is_empty() {
            format!("all {} categories unchanged", AUTH_CATEGORIES.len())
        } else {
            format!(
                "changed: {}; unchanged: {} of {} categories",
                self.changed.join(", "),
                AUTH_CATEGORIES.len() - self.changed.len(),
                AUTH_CATEGORIES.len()
            )
        }
    }
}

fn digest(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Capture all categories, diff them against the baseline, commit, report
///
/// The environment is validated before anything else touches disk, and the
/// store is only created or mutated after the full capture cycle has
/// succeeded: a bad instance home, an uncataloged database or a failed
/// connection all leave the store exactly as it was.
pub fn run_security_check(
    config: &SecurityConfig,
    source: &dyn CatalogSource,
) -> Result<SecurityReport, CheckError> {
    validate_instance_home(&config.instance_home).map_err(CheckError::Db2)?;
    if !source.database_is_cataloged(&config.database)? {
        return Err(Db2Error::NotCataloged(config.database.clone()).into());
    }

    let captures = source.capture_all(&config.database)?;
    debug!("captured {} authorization categories", captures.len());

    let store = BaselineStore::open(&config.history_root, &config.instance_home, &config.database)
        .map_err(CheckError::Store)?;
    let first_run = store.is_fresh();

    let now = Utc::now();
    let mut changed = Vec::new();
    let mut records = Vec::with_capacity(captures.len());
    for (name, text) in &captures {
        let object_changed = if first_run {
            false
        } else {
            store.previous(name).map_err(CheckError::Store)?.as_deref() != Some(text.as_str())
        };
        if object_changed {
            info!("authorization category {} changed", name);
            changed.push(*name);
        }
        records.push(HistoryRecord {
            timestamp: now,
            object: (*name).to_owned(),
            changed: object_changed,
            digest: digest(text),
        });
    }
    store.commit(&captures, &records).map_err(CheckError::Store)?;

    let report = if first_run {
        SecurityReport {
            status: Status::Ok,
            summary: "first execution, nothing to compare".to_owned(),
            changes: 0,
            changed,
            first_run,
        }
    } else if changed.is_empty() {
        SecurityReport {
            status: Status::Ok,
            summary: "no changes".to_owned(),
            changes: 1,
            changed,
            first_run,
        }
    } else {
        SecurityReport {
            status: Status::Warning,
            summary: format!("changes detected: {}", changed.join(", ")),
            changes: 1 + changed.len() as i64,
            changed,
            first_run,
        }
    };
    Ok(report)
}

#[cfg(test)]
mod unit {
    use std::fs;
    use std::path::{Path, PathBuf};

    use tempfile::{tempdir, TempDir};

    use super::{run_security_check, BaselineStore, CheckError, SecurityConfig};
    use crate::db2::{CatalogSource, Db2Error, AUTH_CATEGORIES};
    use crate::Status;

    struct FakeSource {
        cataloged: bool,
        captures: Vec<(&'static str, String)>,
        connection_down: bool,
    }

    impl FakeSource {
        fn healthy() -> FakeSource {
            FakeSource {
                cataloged: true,
                captures: AUTH_CATEGORIES
                    .iter()
                    .map(|c| (c.name, format!("GRANTEE DB2INST1 IN {}", c.catalog)))
                    .collect(),
                connection_down: false,
            }
        }

        fn mutate(&mut self, name: &str) {
            for (capture_name, text) in self.captures.iter_mut() {
                if *capture_name == name {
                    text.push('X');
                }
            }
        }
    }

    impl CatalogSource for FakeSource {
        fn database_is_cataloged(&self, _database: &str) -> Result<bool, Db2Error> {
            Ok(self.cataloged)
        }

        fn capture_all(&self, database: &str) -> Result<Vec<(&'static str, String)>, Db2Error> {
            if self.connection_down {
                return Err(Db2Error::ConnectionFailed(database.to_owned()));
            }
            Ok(self.captures.clone())
        }
    }

    fn instance_home(root: &TempDir) -> PathBuf {
        let home = root.path().join("db2inst1");
        fs::create_dir_all(home.join("sqllib")).unwrap();
        fs::write(home.join("sqllib").join("db2profile"), "# profile\n").unwrap();
        home
    }

    fn config(home: &Path, history: &Path) -> SecurityConfig {
        SecurityConfig {
            instance_home: home.to_path_buf(),
            database: "SAMPLE".to_owned(),
            history_root: history.to_path_buf(),
            warn: 1,
            crit: 2,
        }
    }

    #[test]
    fn first_run_builds_the_baseline() {
        let root = tempdir().unwrap();
        let config = config(&instance_home(&root), root.path());
        let source = FakeSource::healthy();

        let report = run_security_check(&config, &source).unwrap();
        assert_eq!(report.status, Status::Ok);
        assert_eq!(report.summary, "first execution, nothing to compare");
        assert_eq!(report.changes, 0);
        assert!(report.first_run);

        let dir =
            BaselineStore::store_dir(&config.history_root, &config.instance_home, "SAMPLE");
        let captures = fs::read_dir(&dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map_or(false, |ext| ext == "auth"))
            .count();
        assert_eq!(captures, 14);
    }

    #[test]
    fn unchanged_rerun_is_ok_with_changes_one() {
        let root = tempdir().unwrap();
        let config = config(&instance_home(&root), root.path());
        let source = FakeSource::healthy();

        run_security_check(&config, &source).unwrap();
        let report = run_security_check(&config, &source).unwrap();
        assert_eq!(report.status, Status::Ok);
        assert_eq!(report.summary, "no changes");
        assert_eq!(report.changes, 1);
        assert!(!report.first_run);
        assert!(report.changed.is_empty());
    }

    #[test]
    fn single_byte_change_warns_and_names_the_category() {
        let root = tempdir().unwrap();
        let config = config(&instance_home(&root), root.path());
        let mut source = FakeSource::healthy();

        run_security_check(&config, &source).unwrap();
        source.mutate("table");
        let report = run_security_check(&config, &source).unwrap();
        assert_eq!(report.status, Status::Warning);
        assert_eq!(report.changes, 2);
        assert_eq!(report.changed, vec!["table"]);
        assert!(report.summary.contains("table"));
    }

    #[test]
    fn three_changes_accumulate_to_four() {
        let root = tempdir().unwrap();
        let config = config(&instance_home(&root), root.path());
        let mut source = FakeSource::healthy();

        run_security_check(&config, &source).unwrap();
        source.mutate("role");
        source.mutate("schema");
        source.mutate("table");
        let report = run_security_check(&config, &source).unwrap();
        assert_eq!(report.status, Status::Warning);
        assert_eq!(report.changes, 4);
        assert_eq!(report.changed, vec!["role", "schema", "table"]);
    }

    #[test]
    fn commit_happens_even_when_changed() {
        // The new capture becomes the baseline regardless of outcome, so the
        // run after a change is clean again.
        let root = tempdir().unwrap();
        let config = config(&instance_home(&root), root.path());
        let mut source = FakeSource::healthy();

        run_security_check(&config, &source).unwrap();
        source.mutate("index");
        run_security_check(&config, &source).unwrap();
        let report = run_security_check(&config, &source).unwrap();
        assert_eq!(report.status, Status::Ok);
        assert_eq!(report.changes, 1);
    }

    #[test]
    fn invalid_instance_home_leaves_no_store() {
        let root = tempdir().unwrap();
        let mut config = config(&instance_home(&root), root.path());
        config.instance_home = root.path().join("not-an-instance");
        let source = FakeSource::healthy();

        match run_security_check(&config, &source) {
            Err(CheckError::Db2(Db2Error::InvalidInstance(_))) => {}
            other => panic!("expected InvalidInstance, got {:?}", other),
        }
        let dir =
            BaselineStore::store_dir(&config.history_root, &config.instance_home, "SAMPLE");
        assert!(!dir.exists());
    }

    #[test]
    fn uncataloged_database_leaves_no_store() {
        let root = tempdir().unwrap();
        let config = config(&instance_home(&root), root.path());
        let mut source = FakeSource::healthy();
        source.cataloged = false;

        match run_security_check(&config, &source) {
            Err(CheckError::Db2(Db2Error::NotCataloged(db))) => assert_eq!(db, "SAMPLE"),
            other => panic!("expected NotCataloged, got {:?}", other),
        }
    }

    #[test]
    fn connection_failure_preserves_the_baseline() {
        let root = tempdir().unwrap();
        let config = config(&instance_home(&root), root.path());
        let mut source = FakeSource::healthy();

        run_security_check(&config, &source).unwrap();
        let store =
            BaselineStore::open(&config.history_root, &config.instance_home, "SAMPLE").unwrap();
        let before = store.previous("table").unwrap();

        source.connection_down = true;
        source.mutate("table");
        match run_security_check(&config, &source) {
            Err(CheckError::Db2(Db2Error::ConnectionFailed(_))) => {}
            other => panic!("expected ConnectionFailed, got {:?}", other),
        }
        assert_eq!(store.previous("table").unwrap(), before);
        assert_eq!(store.history().unwrap().len(), 14);
    }

    #[test]
    fn history_grows_one_record_per_category_per_run() {
        let root = tempdir().unwrap();
        let config = config(&instance_home(&root), root.path());
        let mut source = FakeSource::healthy();

        run_security_check(&config, &source).unwrap();
        source.mutate("workload");
        run_security_check(&config, &source).unwrap();

        let store =
            BaselineStore::open(&config.history_root, &config.instance_home, "SAMPLE").unwrap();
        let history = store.history().unwrap();
        assert_eq!(history.len(), 28);
        let flagged: Vec<_> = history.iter().filter(|r| r.changed).collect();
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].object, "workload");
    }

    #[test]
    fn store_dir_is_deterministic_and_uppercases_the_database() {
        let dir = BaselineStore::store_dir(
            Path::new("/var/tmp/history"),
            Path::new("/home/db2inst1"),
            "sample",
        );
        assert_eq!(
            dir,
            Path::new("/var/tmp/history").join("home_db2inst1_SAMPLE")
        );
    }

    #[test]
    fn thresholds_validate_ordering_and_positivity() {
        let root = tempdir().unwrap();
        let mut config = config(&instance_home(&root), root.path());
        assert!(config.validate().is_ok());
        config.warn = 5;
        config.crit = 5;
        assert!(config.validate().is_err());
        config.warn = 0;
        assert!(config.validate().is_err());
    }
}
