//! Watch the DB2 authorization catalogs for changes

use std::env;
use std::path::PathBuf;

use serde::Deserialize;
use structopt::StructOpt;

use db2_plugins::db2::{instance_name, Db2Cli};
use db2_plugins::guard::RunGuard;
use db2_plugins::security::{run_security_check, SecurityConfig, SecurityReport};
use db2_plugins::{init_logging, CheckOutput, Metric, Status};

const CHECK_NAME: &str = "check_db2_security";

/// Report changes to the DB2 authorization catalogs since the last run.
///
/// Each run captures the fourteen SYSCAT authorization views over one
/// connection, diffs them byte-for-byte against the baseline kept in the
/// history directory, and commits the new captures as the next baseline.
/// Any changed category is a WARNING. The Changes perfdata value is 0 on
/// the first run for a pair, 1 when nothing changed, and 1 plus the number
/// of changed categories otherwise, matching the original plugin's
/// accumulator.
#[derive(Deserialize, StructOpt, Debug)]
#[structopt(name = "check-db2-security (part of db2-plugins)")]
struct Args {
    #[structopt(
        short = "i",
        long = "instance-home",
        help = "Home directory of the DB2 instance"
    )]
    instance_home: PathBuf,
    #[structopt(
        short = "d",
        long = "database",
        help = "Database name, must be cataloged in the instance"
    )]
    database: String,
    #[structopt(
        short = "D",
        long = "history-dir",
        help = "Where baselines are kept [default: the OS temp dir]"
    )]
    history_dir: Option<PathBuf>,
    #[structopt(
        short = "w",
        long = "warn",
        default_value = "1",
        help = "Warning threshold"
    )]
    warn: u32,
    #[structopt(
        short = "c",
        long = "crit",
        default_value = "2",
        help = "Critical threshold"
    )]
    crit: u32,
    #[structopt(
        short = "v",
        parse(from_occurrences),
        help = "Increase verbosity on stderr (repeatable)"
    )]
    verbose: u8,
    #[structopt(short = "T", long = "trace", help = "Write a trace file under the temp dir")]
    trace: bool,
    #[structopt(short = "K", long = "check-mk", help = "Emit Check_MK local-check output")]
    check_mk: bool,
}

fn main() {
    let args = Args::from_args();
    init_logging(CHECK_NAME, args.verbose, args.trace);

    let config = SecurityConfig {
        instance_home: args.instance_home.clone(),
        database: args.database.to_uppercase(),
        history_root: args.history_dir.clone().unwrap_or_else(env::temp_dir),
        warn: args.warn,
        crit: args.crit,
    };
    if let Err(msg) = config.validate() {
        print_and_exit(&args, CheckOutput::new(Status::Unknown, msg));
    }

    let guard_args: Vec<String> = env::args().skip(1).collect();
    let _guard = match RunGuard::acquire(CHECK_NAME, &guard_args) {
        Ok(guard) => guard,
        Err(e) => print_and_exit(&args, CheckOutput::new(Status::Unknown, e.to_string())),
    };

    let cli = Db2Cli::new(&config.instance_home);
    let output = match run_security_check(&config, &cli) {
        Ok(report) => report_to_output(report),
        Err(e) => CheckOutput::new(Status::Unknown, e.to_string()),
    };
    print_and_exit(&args, output);
}

fn report_to_output(report: SecurityReport) -> CheckOutput {
    let mut out = CheckOutput::new(report.status, report.summary.clone());
    out.metrics.push(Metric::new("Changes", report.changes));
    out.long_text = Some(report.long_text());
    out
}

fn print_and_exit(args: &Args, output: CheckOutput) -> ! {
    if args.check_mk {
        println!(
            "{}",
            output.render_check_mk(
                CHECK_NAME,
                &instance_name(&args.instance_home),
                &args.database.to_uppercase(),
            )
        );
    } else {
        println!("{}", output.render_plain());
    }
    output.status.exit()
}

#[cfg(test)]
mod unit {
    use structopt::StructOpt;

    use super::Args;

    #[test]
    fn usage_is_valid() {
        let args = Args::from_iter(
            ["arg0", "-i", "/home/db2inst1", "-d", "sample"].iter(),
        );
        assert_eq!(args.database, "sample");
        assert_eq!(args.warn, 1);
        assert_eq!(args.crit, 2);
        assert_eq!(args.verbose, 0);
        assert!(args.history_dir.is_none());
        assert!(!args.check_mk);
    }

    #[test]
    fn verbosity_accumulates() {
        let args = Args::from_iter(
            [
                "arg0", "-i", "/home/db2inst1", "-d", "SAMPLE", "-v", "-v", "-K", "-D", "/var/tmp",
            ]
            .iter(),
        );
        assert_eq!(args.verbose, 2);
        assert!(args.check_mk);
        assert_eq!(args.history_dir.unwrap().to_str(), Some("/var/tmp"));
    }
}
