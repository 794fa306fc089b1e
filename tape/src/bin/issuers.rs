//! Dumps the `issuer_info` lookup table from a trade store.
//!
//! # Usage
//!
//! ```sh
//! tape-issuers --db trades.db
//! ```

use std::path::PathBuf;

use rusqlite::{Connection, OpenFlags};

use tape::feed::issuers;

const DEFAULT_DB: &str = "trades.db";

fn main() {
    if let Err(e) = run() {
        eprintln!("tape-issuers: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let db_path = parse_args(&std::env::args().collect::<Vec<_>>())?;

    let conn = Connection::open_with_flags(
        &db_path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| format!("cannot open {}: {e}", db_path.display()))?;

    let mut stdout = std::io::stdout().lock();
    issuers::dump(&conn, &mut stdout)?;

    Ok(())
}

fn parse_args(args: &[String]) -> Result<PathBuf, String> {
    let mut db_path = PathBuf::from(DEFAULT_DB);

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                i += 1;
                let value = args.get(i).ok_or("missing value for --db")?;
                db_path = PathBuf::from(value);
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            arg => return Err(format!("unknown argument: {arg}")),
        }
        i += 1;
    }

    Ok(db_path)
}

fn print_usage() {
    eprintln!(
        r#"tape-issuers - dump the issuer_info lookup table

USAGE:
    tape-issuers [OPTIONS]

OPTIONS:
    -d, --db <PATH>   SQLite trade store path (default: trades.db)
    -h, --help        Print this help message
"#
    );
}
