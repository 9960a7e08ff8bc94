//! Utilities for writing Nagios checks against DB2 databases
//!
//! The check scripts themselves live in `src/bin`, see the docs in the
//! [`scripts`](scripts/index.html) module for their usage. What they share
//! lives here: the Nagios [`Status`](enum.Status.html) codes, perfdata and
//! output rendering for both the classic two-line format and the Check_MK
//! local-check format, and logging setup driven by the `-v`/`-T` flags that
//! every script in the family accepts.

use std::env;
use std::fmt;
use std::fs::File;
use std::process;
use std::str::FromStr;

use log::LevelFilter;
use simplelog::{
    ColorChoice, CombinedLogger, Config, SharedLogger, TermLogger, TerminalMode, WriteLogger,
};

pub mod db2;
pub mod guard;
pub mod scripts;
pub mod security;

/// All the states a Nagios check can be in
///
/// The variants are ordered by severity so that folding a collection of
/// statuses with `std::cmp::max` yields the one that should win.
#[must_use]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Status {
    /// Everything is fine
    Ok,
    /// Something is weird
    Warning,
    /// Something is broken
    Critical,
    /// We couldn't even figure out if anything is broken
    Unknown,
}

impl Status {
    /// The process exit code Nagios expects for this status
    pub fn exit_code(self) -> i32 {
        match self {
            Status::Ok => 0,
            Status::Warning => 1,
            Status::Critical => 2,
            Status::Unknown => 3,
        }
    }

    /// Exit the process with the appropriate return code
    pub fn exit(self) -> ! {
        process::exit(self.exit_code())
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match *self {
            Status::Ok => "OK",
            Status::Warning => "WARNING",
            Status::Critical => "CRITICAL",
            Status::Unknown => "UNKNOWN",
        };
        write!(f, "{}", msg)
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Status, String> {
        match &*s.to_lowercase() {
            "ok" => Ok(Status::Ok),
            "warning" | "warn" => Ok(Status::Warning),
            "critical" | "crit" => Ok(Status::Critical),
            "unknown" => Ok(Status::Unknown),
            _ => Err(format!(
                "unknown status: {} (expected one of ok/warning/critical/unknown)",
                s
            )),
        }
    }
}

/// One `label=value;warn;crit` perfdata entry
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Metric {
    pub label: String,
    pub value: i64,
    pub warn: Option<i64>,
    pub crit: Option<i64>,
}

impl Metric {
    pub fn new(label: &str, value: i64) -> Metric {
        Metric {
            label: label.to_owned(),
            value,
            warn: None,
            crit: None,
        }
    }

    pub fn with_thresholds(label: &str, value: i64, warn: i64, crit: i64) -> Metric {
        Metric {
            label: label.to_owned(),
            value,
            warn: Some(warn),
            crit: Some(crit),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}={}", self.label, self.value)?;
        if let (Some(warn), Some(crit)) = (self.warn, self.crit) {
            write!(f, ";{};{}", warn, crit)?;
        }
        Ok(())
    }
}

/// The complete result of one check invocation
///
/// Everything a script wants to say, gathered up so that `main` can render it
/// once in whichever output mode was requested instead of `println!`ing as it
/// goes.
#[derive(Debug)]
pub struct CheckOutput {
    pub status: Status,
    pub text: String,
    pub metrics: Vec<Metric>,
    pub long_text: Option<String>,
    pub long_metrics: Vec<Metric>,
}

impl CheckOutput {
    pub fn new(status: Status, text: String) -> CheckOutput {
        CheckOutput {
            status,
            text,
            metrics: Vec::new(),
            long_text: None,
            long_metrics: Vec::new(),
        }
    }

    /// The classic plugin format: `status_text|perfdata` followed by
    /// `long_text|long_perfdata`
    pub fn render_plain(&self) -> String {
        let mut out = format!(
            "{}: {}|{}",
            self.status,
            self.text,
            join_metrics(&self.metrics)
        );
        if self.long_text.is_some() || !self.long_metrics.is_empty() {
            out.push('\n');
            out.push_str(&format!(
                "{}|{}",
                self.long_text.as_deref().unwrap_or(""),
                join_metrics(&self.long_metrics)
            ));
        }
        out
    }

    /// The Check_MK local-check format:
    /// `<code> <check_name>-<instance>-<database> <perfdata_or_dash> <status_text>`
    pub fn render_check_mk(&self, check_name: &str, instance: &str, database: &str) -> String {
        let perf = if self.metrics.is_empty() {
            "-".to_owned()
        } else {
            self.metrics
                .iter()
                .map(|m| m.to_string())
                .collect::<Vec<_>>()
                .join("|")
        };
        format!(
            "{} {}-{}-{} {} {}",
            self.status.exit_code(),
            check_name,
            instance,
            database,
            perf,
            self.text
        )
    }
}

fn join_metrics(metrics: &[Metric]) -> String {
    metrics
        .iter()
        .map(|m| m.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Display a number of bytes for humans who don't count that high
pub fn bytes_to_human_size(bytes: u64) -> String {
    let mut bytes = bytes as f64;
    let sizes = ["B", "K", "M", "G", "T"];
    let mut reductions = 0;
    while reductions < sizes.len() - 1 {
        if bytes > 1000.0 {
            bytes /= 1024.0;
            reductions += 1;
        } else {
            break;
        }
    }
    format!("{:.1}{}", bytes, sizes[reductions])
}

/// Set up logging for a check script from its `-v` count and `-T` flag
///
/// Verbosity maps onto log levels (0 errors only, up to 3+ for trace); `-T`
/// additionally copies everything at trace level into
/// `<tempdir>/<check_name>.trace` so a run can be handed to support without
/// re-running it with a terminal attached.
pub fn init_logging(check_name: &str, verbose: u8, trace_file: bool) {
    let level = match verbose {
        0 => LevelFilter::Error,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        level,
        Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Never,
    )];
    if trace_file {
        let path = env::temp_dir().join(format!("{}.trace", check_name));
        if let Ok(file) = File::create(&path) {
            loggers.push(WriteLogger::new(LevelFilter::Trace, Config::default(), file));
        }
    }
    // A second init (tests) is harmless, the first logger wins.
    let _ = CombinedLogger::init(loggers);
}

#[cfg(test)]
mod unit {
    use std::cmp::max;

    use super::{bytes_to_human_size, CheckOutput, Metric, Status};

    #[test]
    fn statuses_order_by_severity() {
        assert!(Status::Ok < Status::Warning);
        assert!(Status::Warning < Status::Critical);
        assert!(Status::Critical < Status::Unknown);
        let folded = [Status::Ok, Status::Warning, Status::Ok]
            .iter()
            .fold(Status::Ok, |acc, &s| max(acc, s));
        assert_eq!(folded, Status::Warning);
    }

    #[test]
    fn status_parses_both_spellings() {
        assert_eq!("ok".parse::<Status>(), Ok(Status::Ok));
        assert_eq!("WARN".parse::<Status>(), Ok(Status::Warning));
        assert_eq!("Critical".parse::<Status>(), Ok(Status::Critical));
        assert!("borked".parse::<Status>().is_err());
    }

    #[test]
    fn metrics_render_with_and_without_thresholds() {
        assert_eq!(Metric::new("Changes", 0).to_string(), "Changes=0");
        assert_eq!(
            Metric::with_thresholds("Connections", 12, 40, 50).to_string(),
            "Connections=12;40;50"
        );
    }

    #[test]
    fn plain_output_is_two_lines_with_pipes() {
        let mut out = CheckOutput::new(Status::Warning, "changes detected: table".to_owned());
        out.metrics.push(Metric::new("Changes", 2));
        out.long_text = Some("changed: table".to_owned());
        assert_eq!(
            out.render_plain(),
            "WARNING: changes detected: table|Changes=2\nchanged: table|"
        );
    }

    #[test]
    fn check_mk_output_is_one_line() {
        let mut out = CheckOutput::new(Status::Ok, "no changes".to_owned());
        out.metrics.push(Metric::new("Changes", 1));
        assert_eq!(
            out.render_check_mk("check_db2_security", "db2inst1", "SAMPLE"),
            "0 check_db2_security-db2inst1-SAMPLE Changes=1 no changes"
        );
    }

    #[test]
    fn check_mk_output_dashes_empty_perfdata() {
        let out = CheckOutput::new(Status::Unknown, "cannot connect".to_owned());
        assert_eq!(
            out.render_check_mk("check_db2_security", "db2inst1", "SAMPLE"),
            "3 check_db2_security-db2inst1-SAMPLE - cannot connect"
        );
    }

    #[test]
    fn bytes_to_human_size_produces_shortest() {
        let reprs = [
            (999, "999.0B"),
            (9_999, "9.8K"),
            (9_999_999, "9.5M"),
            (9_999_999_999, "9.3G"),
            (9_999_999_999_999, "9.1T"),
        ];
        for &(raw, repr) in reprs.iter() {
            assert_eq!(bytes_to_human_size(raw), repr);
        }
    }
}
