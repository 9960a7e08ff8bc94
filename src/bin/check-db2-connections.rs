//! Check the number of connections to a DB2 database

use std::cmp::max;
use std::env;
use std::path::PathBuf;

use serde::Deserialize;
use structopt::StructOpt;

use db2_plugins::db2::{instance_name, parse_snapshot_counter, CatalogSource, Db2Cli};
use db2_plugins::guard::RunGuard;
use db2_plugins::{init_logging, CheckOutput, Metric, Status};

const CHECK_NAME: &str = "check_db2_connections";
const COUNTER: &str = "Applications connected currently";

/// Check the number of applications currently connected to a DB2 database.
///
/// Reads the database snapshot and compares the current connection count
/// against the thresholds.
#[derive(Deserialize, StructOpt, Debug)]
#[structopt(name = "check-db2-connections (part of db2-plugins)")]
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
        short = "w",
        long = "warn",
        default_value = "40",
        help = "Connection count to warn at"
    )]
    warn: i64,
    #[structopt(
        short = "c",
        long = "crit",
        default_value = "50",
        help = "Connection count to go critical at"
    )]
    crit: i64,
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

    if args.warn <= 0 || args.crit <= 0 || args.warn >= args.crit {
        print_and_exit(
            &args,
            CheckOutput::new(
                Status::Unknown,
                format!(
                    "thresholds must be positive with warning ({}) below critical ({})",
                    args.warn, args.crit
                ),
            ),
        );
    }

    let guard_args: Vec<String> = env::args().skip(1).collect();
    let _guard = match RunGuard::acquire(CHECK_NAME, &guard_args) {
        Ok(guard) => guard,
        Err(e) => print_and_exit(&args, CheckOutput::new(Status::Unknown, e.to_string())),
    };

    let output = match count_connections(&args) {
        Ok(connections) => rate_connections(&args, connections),
        Err(e) => CheckOutput::new(Status::Unknown, e.to_string()),
    };
    print_and_exit(&args, output);
}

fn count_connections(args: &Args) -> Result<i64, db2_plugins::db2::Db2Error> {
    let cli = Db2Cli::new(&args.instance_home);
    cli.validate_instance()?;
    let database = args.database.to_uppercase();
    if !cli.database_is_cataloged(&database)? {
        return Err(db2_plugins::db2::Db2Error::NotCataloged(database));
    }
    let snapshot = cli.run_connected(
        &database,
        &format!("get snapshot for database on {}", database),
    )?;
    parse_snapshot_counter(&snapshot, COUNTER)
}

fn rate_connections(args: &Args, connections: i64) -> CheckOutput {
    let mut status = Status::Ok;
    let text;
    if connections >= args.crit {
        status = Status::Critical;
        text = format!(
            "{} applications connected (greater than {})",
            connections, args.crit
        );
    } else if connections >= args.warn {
        status = max(status, Status::Warning);
        text = format!(
            "{} applications connected (greater than {})",
            connections, args.warn
        );
    } else {
        text = format!(
            "{} applications connected (less than {})",
            connections, args.warn
        );
    }
    let mut out = CheckOutput::new(status, text);
    out.metrics.push(Metric::with_thresholds(
        "Connections",
        connections,
        args.warn,
        args.crit,
    ));
    out.long_text = Some(format!("{} = {}", COUNTER, connections));
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

    use super::{rate_connections, Args};
    use db2_plugins::Status;

    fn args(argv: &[&str]) -> Args {
        let mut full = vec!["arg0", "-i", "/home/db2inst1", "-d", "SAMPLE"];
        full.extend_from_slice(argv);
        Args::from_iter(full.iter())
    }

    #[test]
    fn usage_is_valid() {
        let args = args(&[]);
        assert_eq!(args.warn, 40);
        assert_eq!(args.crit, 50);
    }

    #[test]
    fn counts_rate_against_thresholds() {
        let args = args(&["-w", "10", "-c", "20"]);
        assert_eq!(rate_connections(&args, 5).status, Status::Ok);
        assert_eq!(rate_connections(&args, 10).status, Status::Warning);
        assert_eq!(rate_connections(&args, 25).status, Status::Critical);
    }

    #[test]
    fn perfdata_carries_thresholds() {
        let args = args(&[]);
        let out = rate_connections(&args, 7);
        assert_eq!(out.metrics[0].to_string(), "Connections=7;40;50");
    }
}
