//! Drive the `db2` command-line processor and parse its output
//!
//! The DB2 CLP is the only interface these checks have to the database: we
//! source the instance profile, run `db2 ...` in a shell, and scrape the
//! free-text result. Every scrape goes through a parser in this module that
//! knows the exact line shape it expects and errors out (which the scripts
//! report as UNKNOWN) when the output doesn't match, instead of silently
//! extracting garbage.

use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use derive_more::From;
use lazy_static::lazy_static;
use log::{debug, trace};
use regex::Regex;

/// One of the authorization catalog views tracked by check-db2-security
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AuthCategory {
    /// Short name used for capture files, history records and messages
    pub name: &'static str,
    /// The SYSCAT view holding this category's grants
    pub catalog: &'static str,
}

/// The fixed set of authorization categories, one per SYSCAT *AUTH view
pub const AUTH_CATEGORIES: [AuthCategory; 14] = [
    AuthCategory { name: "columns", catalog: "SYSCAT.COLAUTH" },
    AuthCategory { name: "database", catalog: "SYSCAT.DBAUTH" },
    AuthCategory { name: "index", catalog: "SYSCAT.INDEXAUTH" },
    AuthCategory { name: "module", catalog: "SYSCAT.MODULEAUTH" },
    AuthCategory { name: "package", catalog: "SYSCAT.PACKAGEAUTH" },
    AuthCategory { name: "role", catalog: "SYSCAT.ROLEAUTH" },
    AuthCategory { name: "routine", catalog: "SYSCAT.ROUTINEAUTH" },
    AuthCategory { name: "schema", catalog: "SYSCAT.SCHEMAAUTH" },
    AuthCategory { name: "sequence", catalog: "SYSCAT.SEQUENCEAUTH" },
    AuthCategory { name: "table", catalog: "SYSCAT.TABAUTH" },
    AuthCategory { name: "tablespace", catalog: "SYSCAT.TBSPACEAUTH" },
    AuthCategory { name: "variable", catalog: "SYSCAT.VARIABLEAUTH" },
    AuthCategory { name: "workload", catalog: "SYSCAT.WORKLOADAUTH" },
    AuthCategory { name: "xsrobject", catalog: "SYSCAT.XSROBJECTAUTH" },
];

/// Errors talking to, or making sense of, the db2 CLP
#[derive(Debug, From)]
pub enum Db2Error {
    /// Errors originating in IO while spawning the shell
    Io(io::Error),
    /// The instance home does not look like a DB2 instance
    #[from(ignore)]
    InvalidInstance(PathBuf),
    /// The database is not in the local database directory
    #[from(ignore)]
    NotCataloged(String),
    /// `connect to` failed
    #[from(ignore)]
    ConnectionFailed(String),
    /// A db2 command returned an error code
    #[from(ignore)]
    CommandFailed(String),
    /// Output didn't have the shape the parser expects
    #[from(ignore)]
    Unparsed(String),
}

impl fmt::Display for Db2Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use self::Db2Error::*;
        match self {
            Io(e) => write!(f, "error running db2: {}", e),
            InvalidInstance(path) => write!(
                f,
                "{} is not a DB2 instance home (no sqllib/db2profile)",
                path.display()
            ),
            NotCataloged(db) => write!(f, "database {} is not cataloged in this instance", db),
            ConnectionFailed(db) => write!(f, "cannot connect to database {}", db),
            CommandFailed(msg) => write!(f, "db2 command failed: {}", msg),
            Unparsed(msg) => write!(f, "unrecognized db2 output: {}", msg),
        }
    }
}

/// Where check-db2-security gets its category captures from
///
/// The shell-out implementation is [`Db2Cli`](struct.Db2Cli.html); tests use
/// an in-memory fake.
pub trait CatalogSource {
    /// Is `database` in the instance's local database directory?
    fn database_is_cataloged(&self, database: &str) -> Result<bool, Db2Error>;

    /// Capture every tracked category over a single connection
    ///
    /// Returns one `(category name, text)` pair per entry of
    /// [`AUTH_CATEGORIES`](constant.AUTH_CATEGORIES.html), in order. An empty
    /// result set is an empty string, not an error. If the connection cannot
    /// be opened nothing is returned at all.
    fn capture_all(&self, database: &str) -> Result<Vec<(&'static str, String)>, Db2Error>;
}

/// Runs db2 commands under `sh`, sourcing the instance profile first
#[derive(Debug, Clone)]
pub struct Db2Cli {
    instance_home: PathBuf,
}

// Marks the start of one category's rows in the capture_all output stream.
const SECTION_MARKER: &str = "==[capture]==";

impl Db2Cli {
    pub fn new(instance_home: &Path) -> Db2Cli {
        Db2Cli {
            instance_home: instance_home.to_path_buf(),
        }
    }

    pub fn instance_home(&self) -> &Path {
        &self.instance_home
    }

    fn profile(&self) -> PathBuf {
        self.instance_home.join("sqllib").join("db2profile")
    }

    /// Check that the instance home exists and carries a db2profile
    pub fn validate_instance(&self) -> Result<(), Db2Error> {
        validate_instance_home(&self.instance_home)
    }

    /// Pipe a script into `sh -s` and collect stdout plus the exit code
    fn run_script(&self, script: &str) -> Result<(String, i32), Db2Error> {
        trace!("running shell script:\n{}", script);
        let mut child = Command::new("sh")
            .arg("-s")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;
        child
            .stdin
            .take()
            .ok_or_else(|| Db2Error::CommandFailed("could not open shell stdin".to_owned()))?
            .write_all(script.as_bytes())?;
        let output = child.wait_with_output()?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let code = output.status.code().unwrap_or(-1);
        debug!("shell exited with code {}", code);
        Ok((stdout, code))
    }

    /// The database aliases known to the local database directory
    pub fn list_databases(&self) -> Result<Vec<String>, Db2Error> {
        let script = format!(
            ". {} >/dev/null 2>&1\ndb2 list db directory\n",
            self.profile().display()
        );
        let (stdout, _code) = self.run_script(&script)?;
        parse_db_directory(&stdout)
    }

    /// Run one statement over a fresh connection, returning its raw output
    ///
    /// The connection is opened, the statement run through `db2 -x`, and the
    /// connection reset again, all in one shell.
    pub fn run_connected(&self, database: &str, statement: &str) -> Result<String, Db2Error> {
        let script = format!(
            ". {profile} >/dev/null 2>&1\n\
             db2 -o- connect to {db} >/dev/null 2>&1 || exit 9\n\
             db2 -x \"{stmt}\"\n\
             rc=$?\n\
             db2 -o- connect reset >/dev/null 2>&1\n\
             test $rc -le 2 || exit 4\n",
            profile = self.profile().display(),
            db = database,
            stmt = statement,
        );
        let (stdout, code) = self.run_script(&script)?;
        match code {
            9 => Err(Db2Error::ConnectionFailed(database.to_owned())),
            4 => Err(Db2Error::CommandFailed(format!(
                "{} against {}",
                statement, database
            ))),
            _ => Ok(stdout),
        }
    }
}

impl CatalogSource for Db2Cli {
    fn database_is_cataloged(&self, database: &str) -> Result<bool, Db2Error> {
        let wanted = database.to_uppercase();
        Ok(self.list_databases()?.iter().any(|db| *db == wanted))
    }

    fn capture_all(&self, database: &str) -> Result<Vec<(&'static str, String)>, Db2Error> {
        let mut script = format!(
            ". {profile} >/dev/null 2>&1\n\
             db2 -o- connect to {db} >/dev/null 2>&1 || exit 9\n",
            profile = self.profile().display(),
            db = database,
        );
        for category in AUTH_CATEGORIES.iter() {
            script.push_str(&format!(
                "echo '{marker} {name}'\n\
                 db2 -x \"SELECT * FROM {catalog}\"\n\
                 test $? -le 2 || exit 4\n",
                marker = SECTION_MARKER,
                name = category.name,
                catalog = category.catalog,
            ));
        }
        script.push_str("db2 -o- connect reset >/dev/null 2>&1\nexit 0\n");

        let (stdout, code) = self.run_script(&script)?;
        match code {
            9 => Err(Db2Error::ConnectionFailed(database.to_owned())),
            4 => Err(Db2Error::CommandFailed(format!(
                "catalog query against {}",
                database
            ))),
            0 => split_captures(&stdout),
            other => Err(Db2Error::CommandFailed(format!(
                "shell exited with code {}",
                other
            ))),
        }
    }
}

/// Split the capture_all output stream back into per-category texts
///
/// The stream must contain exactly one marker line per tracked category, in
/// the fixed category order; anything else means we didn't get the capture we
/// asked for and nothing should be committed.
fn split_captures(output: &str) -> Result<Vec<(&'static str, String)>, Db2Error> {
    let mut sections: Vec<(&str, Vec<&str>)> = Vec::new();
    for line in output.lines() {
        if let Some(rest) = line.strip_prefix(SECTION_MARKER) {
            sections.push((rest.trim(), Vec::new()));
        } else if let Some(section) = sections.last_mut() {
            section.1.push(line);
        } else if !line.trim().is_empty() {
            return Err(Db2Error::Unparsed(format!(
                "unexpected text before first capture marker: {:?}",
                line
            )));
        }
    }
    if sections.len() != AUTH_CATEGORIES.len() {
        return Err(Db2Error::Unparsed(format!(
            "expected {} capture sections, found {}",
            AUTH_CATEGORIES.len(),
            sections.len()
        )));
    }
    let mut captures = Vec::with_capacity(AUTH_CATEGORIES.len());
    for (category, (name, lines)) in AUTH_CATEGORIES.iter().zip(sections) {
        if category.name != name {
            return Err(Db2Error::Unparsed(format!(
                "capture sections out of order: expected {}, found {}",
                category.name, name
            )));
        }
        captures.push((category.name, lines.join("\n").trim_end().to_owned()));
    }
    Ok(captures)
}

lazy_static! {
    static ref DB_ALIAS: Regex = Regex::new(r"(?m)^\s*Database alias\s*=\s*(\S+)\s*$").unwrap();
}

/// Parse `db2 list db directory` output into the list of cataloged aliases
pub fn parse_db_directory(output: &str) -> Result<Vec<String>, Db2Error> {
    // SQL1057W: the database directory exists but holds no entries.
    if output.contains("SQL1057W") {
        return Ok(Vec::new());
    }
    let aliases: Vec<String> = DB_ALIAS
        .captures_iter(output)
        .map(|cap| cap[1].to_owned())
        .collect();
    if aliases.is_empty() {
        return Err(Db2Error::Unparsed(
            "no 'Database alias' entries in db directory listing".to_owned(),
        ));
    }
    Ok(aliases)
}

/// Extract one `<key> = <integer>` counter from snapshot output
pub fn parse_snapshot_counter(output: &str, key: &str) -> Result<i64, Db2Error> {
    let re = Regex::new(&format!(
        r"(?m)^\s*{}\s*=\s*(\S+)\s*$",
        regex::escape(key)
    ))
    .map_err(|e| Db2Error::Unparsed(e.to_string()))?;
    let raw = re
        .captures(output)
        .map(|cap| cap[1].to_owned())
        .ok_or_else(|| Db2Error::Unparsed(format!("counter {:?} not in snapshot output", key)))?;
    raw.parse().map_err(|_| {
        Db2Error::Unparsed(format!("counter {:?} has non-numeric value {:?}", key, raw))
    })
}

/// The interesting output parameters of GET_DBSIZE_INFO
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbSizeInfo {
    /// Current database size in bytes
    pub size: i64,
    /// Maximum storage available to the database in bytes
    pub capacity: i64,
}

lazy_static! {
    static ref PARAM_NAME: Regex = Regex::new(r"^\s*Parameter Name\s*:\s*(\S+)\s*$").unwrap();
    static ref PARAM_VALUE: Regex = Regex::new(r"^\s*Parameter Value\s*:\s*(\S+)\s*$").unwrap();
}

/// Parse the `CALL GET_DBSIZE_INFO(?, ?, ?, -1)` parameter block
pub fn parse_dbsize_info(output: &str) -> Result<DbSizeInfo, Db2Error> {
    let mut size = None;
    let mut capacity = None;
    let mut pending: Option<String> = None;
    for line in output.lines() {
        if let Some(cap) = PARAM_NAME.captures(line) {
            pending = Some(cap[1].to_owned());
        } else if let Some(cap) = PARAM_VALUE.captures(line) {
            let value = cap[1].to_owned();
            match pending.take().as_deref() {
                Some("DATABASESIZE") => {
                    size = Some(value.parse().map_err(|_| {
                        Db2Error::Unparsed(format!("DATABASESIZE is not a number: {:?}", value))
                    })?)
                }
                Some("DATABASECAPACITY") => {
                    capacity = Some(value.parse().map_err(|_| {
                        Db2Error::Unparsed(format!("DATABASECAPACITY is not a number: {:?}", value))
                    })?)
                }
                _ => {}
            }
        }
    }
    match (size, capacity) {
        (Some(size), Some(capacity)) => Ok(DbSizeInfo { size, capacity }),
        _ => Err(Db2Error::Unparsed(
            "GET_DBSIZE_INFO output is missing DATABASESIZE or DATABASECAPACITY".to_owned(),
        )),
    }
}

/// Check that a path exists and looks like a DB2 instance home
pub fn validate_instance_home(instance_home: &Path) -> Result<(), Db2Error> {
    let profile = instance_home.join("sqllib").join("db2profile");
    if instance_home.is_dir() && profile.is_file() {
        Ok(())
    } else {
        Err(Db2Error::InvalidInstance(instance_home.to_path_buf()))
    }
}

/// The instance name for output labels, the last path component of its home
pub fn instance_name(instance_home: &Path) -> String {
    instance_home
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| instance_home.display().to_string())
}
