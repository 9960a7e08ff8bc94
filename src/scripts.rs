//! Documentation about the various scripts contained herein
//!
//! - [check-db2-security](#check-db2-security)
//! - [check-db2-connections](#check-db2-connections)
//! - [check-db2-dbsize](#check-db2-dbsize)
//!
//! Every script talks to a local DB2 instance through the `db2` command-line
//! processor, so it must run as a user that can source
//! `<instance home>/sqllib/db2profile` and connect to the database. All of
//! them take the same family of flags: `-i` instance home, `-d` database,
//! `-w`/`-c` thresholds, a repeatable `-v` for verbosity, `-T` to write a
//! trace file under the temp dir, and `-K` to emit Check_MK local-check
//! output instead of the classic two-line Nagios format. Exit codes follow
//! the Nagios convention: 0 OK, 1 WARNING, 2 CRITICAL, 3 UNKNOWN.
//!
//! # check-db2-security
//!
//! Watches the fourteen `SYSCAT.*AUTH` authorization catalogs for changes
//! between runs. The first run for an (instance, database) pair builds a
//! baseline under the history directory and reports OK with `Changes=0`;
//! every later run re-captures all fourteen categories, diffs them
//! byte-for-byte against the baseline, commits the new captures, and
//! reports:
//!
//! - OK with `Changes=1` when nothing changed,
//! - WARNING naming the changed categories with `Changes=<1 + count>`
//!   when something did.
//!
//! `Changes=0` therefore means "first run", not "fewer changes than 1";
//! this matches what deployed dashboards for the original plugin expect.
//!
//! ```plain
//! $ check-db2-security --help
//! check-db2-security (part of db2-plugins)
//! Report changes to the DB2 authorization catalogs since the last run
//!
//! USAGE:
//!     check-db2-security [FLAGS] [OPTIONS] -i <instance-home> -d <database>
//!
//! FLAGS:
//!     -K, --check-mk    Emit Check_MK local-check output
//!     -h, --help        Prints help information
//!     -T, --trace       Write a trace file under the temp dir
//!     -V, --version     Prints version information
//!     -v                Increase verbosity on stderr (repeatable)
//!
//! OPTIONS:
//!     -c, --crit <crit>                    Critical threshold [default: 2]
//!     -d, --database <database>            Database name, must be cataloged in the instance
//!     -D, --history-dir <history-dir>      Where baselines are kept [default: the OS temp dir]
//!     -i, --instance-home <instance-home>  Home directory of the DB2 instance
//!     -w, --warn <warn>                    Warning threshold [default: 1]
//! ```
//!
//! # check-db2-connections
//!
//! Compares `Applications connected currently` from the database snapshot
//! against the thresholds. Perfdata: `Connections=<n>;<warn>;<crit>`.
//!
//! ```plain
//! $ check-db2-connections --help
//! check-db2-connections (part of db2-plugins)
//! Check the number of applications currently connected to a DB2 database
//!
//! USAGE:
//!     check-db2-connections [FLAGS] [OPTIONS] -i <instance-home> -d <database>
//!
//! FLAGS:
//!     -K, --check-mk    Emit Check_MK local-check output
//!     -h, --help        Prints help information
//!     -T, --trace       Write a trace file under the temp dir
//!     -V, --version     Prints version information
//!     -v                Increase verbosity on stderr (repeatable)
//!
//! OPTIONS:
//!     -c, --crit <crit>                    Connection count to go critical at [default: 50]
//!     -d, --database <database>            Database name, must be cataloged in the instance
//!     -i, --instance-home <instance-home>  Home directory of the DB2 instance
//!     -w, --warn <warn>                    Connection count to warn at [default: 40]
//! ```
//!
//! # check-db2-dbsize
//!
//! Calls `GET_DBSIZE_INFO` and compares the database's used percentage of
//! its capacity against the thresholds. Perfdata is in bytes; the status
//! text shows human-readable sizes.
//!
//! ```plain
//! $ check-db2-dbsize --help
//! check-db2-dbsize (part of db2-plugins)
//! Check the size of a DB2 database against its capacity
//!
//! USAGE:
//!     check-db2-dbsize [FLAGS] [OPTIONS] -i <instance-home> -d <database>
//!
//! FLAGS:
//!     -K, --check-mk    Emit Check_MK local-check output
//!     -h, --help        Prints help information
//!     -T, --trace       Write a trace file under the temp dir
//!     -V, --version     Prints version information
//!     -v                Increase verbosity on stderr (repeatable)
//!
//! OPTIONS:
//!     -c, --crit <crit>                    Percent of capacity to go critical at [default: 95]
//!     -d, --database <database>            Database name, must be cataloged in the instance
//!     -i, --instance-home <instance-home>  Home directory of the DB2 instance
//!     -w, --warn <warn>                    Percent of capacity to warn at [default: 85]
//! ```
