//! Check the size of a DB2 database

use std::env;
use std::path::PathBuf;

use serde::Deserialize;
use structopt::StructOpt;

use db2_plugins::db2::{
    instance_name, parse_dbsize_info, CatalogSource, Db2Cli, Db2Error, DbSizeInfo,
};
use db2_plugins::guard::RunGuard;
use db2_plugins::{bytes_to_human_size, init_logging, CheckOutput, Metric, Status};

const CHECK_NAME: &str = "check_db2_dbsize";

/// Check the size of a DB2 database against its capacity.
///
/// Calls the GET_DBSIZE_INFO procedure and compares the database's used
/// percentage of its capacity against the thresholds. Perfdata is in bytes.
#[derive(Deserialize, StructOpt, Debug)]
#[structopt(name = "check-db2-dbsize (part of db2-plugins)")]
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
        default_value = "85",
        help = "Percent of capacity to warn at"
    )]
    warn: u32,
    #[structopt(
        short = "c",
        long = "crit",
        default_value = "95",
        help = "Percent of capacity to go critical at"
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

    if args.warn == 0 || args.crit == 0 || args.warn >= args.crit {
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

    let output = match fetch_size(&args) {
        Ok(info) => rate_size(&args, info),
        Err(e) => CheckOutput::new(Status::Unknown, e.to_string()),
    };
    print_and_exit(&args, output);
}

fn fetch_size(args: &Args) -> Result<DbSizeInfo, Db2Error> {
    let cli = Db2Cli::new(&args.instance_home);
    cli.validate_instance()?;
    let database = args.database.to_uppercase();
    if !cli.database_is_cataloged(&database)? {
        return Err(Db2Error::NotCataloged(database));
    }
    let output = cli.run_connected(&database, "CALL GET_DBSIZE_INFO(?, ?, ?, -1)")?;
    parse_dbsize_info(&output)
}

fn rate_size(args: &Args, info: DbSizeInfo) -> CheckOutput {
    let percent = if info.capacity > 0 {
        info.size as f64 * 100.0 / info.capacity as f64
    } else {
        100.0
    };
    let detail = format!(
        "database uses {} of {} ({:.1}% of capacity)",
        bytes_to_human_size(info.size.max(0) as u64),
        bytes_to_human_size(info.capacity.max(0) as u64),
        percent
    );
    let status = if percent >= args.crit as f64 {
        Status::Critical
    } else if percent >= args.warn as f64 {
        Status::Warning
    } else {
        Status::Ok
    };
    let mut out = CheckOutput::new(status, detail);
    out.metrics.push(Metric::with_thresholds(
        "Size",
        info.size,
        info.capacity * args.warn as i64 / 100,
        info.capacity * args.crit as i64 / 100,
    ));
    out.metrics.push(Metric::new("Capacity", info.capacity));
    out.long_text = Some(format!(
        "DATABASESIZE = {} DATABASECAPACITY = {}",
        info.size, info.capacity
    ));
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

    use super::{rate_size, Args};
    use db2_plugins::db2::DbSizeInfo;
    use db2_plugins::Status;

    fn args() -> Args {
        Args::from_iter(["arg0", "-i", "/home/db2inst1", "-d", "SAMPLE"].iter())
    }

    #[test]
    fn usage_is_valid() {
        let args = args();
        assert_eq!(args.warn, 85);
        assert_eq!(args.crit, 95);
        assert!(!args.trace);
    }

    #[test]
    fn sizes_rate_against_capacity_percent() {
        let args = args();
        let ok = rate_size(&args, DbSizeInfo { size: 100, capacity: 1000 });
        assert_eq!(ok.status, Status::Ok);
        let warn = rate_size(&args, DbSizeInfo { size: 900, capacity: 1000 });
        assert_eq!(warn.status, Status::Warning);
        let crit = rate_size(&args, DbSizeInfo { size: 990, capacity: 1000 });
        assert_eq!(crit.status, Status::Critical);
    }

    #[test]
    fn perfdata_thresholds_are_in_bytes() {
        let args = args();
        let out = rate_size(&args, DbSizeInfo { size: 500, capacity: 1000 });
        assert_eq!(out.metrics[0].to_string(), "Size=500;850;950");
        assert_eq!(out.metrics[1].to_string(), "Capacity=1000");
    }
}
