//! Issuer reference data backed by the `issuer_info` SQL table.
//!
//! The table maps an issuer's display name to its sector and credit rating.
//! The ingest path loads it once at startup and uses it to enrich incoming
//! trades; `tape-issuers` dumps it for inspection.

use std::collections::HashMap;
use std::io::{self, Write};

use rusqlite::Connection;

use crate::fmt::Tuple;

/// Reference data for a single issuer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuerInfo {
    pub name: String,
    pub sector: String,
    pub rating: String,
}

/// In-memory snapshot of the `issuer_info` table, keyed by issuer name.
#[derive(Debug, Default)]
pub struct IssuerTable {
    entries: HashMap<String, IssuerInfo>,
}

/// Issuers seeded into a fresh database, with sector and rating.
const SEED_ISSUERS: &[(&str, &str, &str)] = &[
    ("US Treasury", "Government", "AAA"),
    ("IBM", "Technology", "A-"),
    ("Apple", "Technology", "AA+"),
    ("Microsoft", "Technology", "AAA"),
    ("Johnson & Johnson", "Healthcare", "AAA"),
    ("Fannie Mae", "Agency", "AA+"),
    ("Goldman Sachs", "Financials", "BBB+"),
    ("Citi", "Financials", "BBB+"),
    ("Amazon", "Consumer", "AA"),
    ("Pfizer", "Healthcare", "A"),
];

impl IssuerTable {
    /// An empty table; every lookup misses.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Loads the full `issuer_info` table.
    ///
    /// # Errors
    ///
    /// Returns the underlying SQLite error if the table is missing or the
    /// query fails.
    pub fn load(conn: &Connection) -> Result<Self, rusqlite::Error> {
        let mut stmt = conn.prepare("SELECT name, sector, rating FROM issuer_info")?;
        let rows = stmt.query_map([], |row| {
            Ok(IssuerInfo {
                name: row.get(0)?,
                sector: row.get(1)?,
                rating: row.get(2)?,
            })
        })?;

        let mut entries = HashMap::new();
        for info in rows {
            let info = info?;
            entries.insert(info.name.clone(), info);
        }
        Ok(Self { entries })
    }

    /// Looks up an issuer by display name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&IssuerInfo> {
        self.entries.get(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Creates the `issuer_info` table if absent.
///
/// # Errors
///
/// Returns the underlying SQLite error on failure.
pub fn ensure_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS issuer_info (
            name TEXT PRIMARY KEY,
            sector TEXT NOT NULL,
            rating TEXT NOT NULL
        )",
        [],
    )?;
    Ok(())
}

/// Seeds the well-known issuers into an empty `issuer_info` table.
///
/// Existing rows are left untouched.
///
/// # Errors
///
/// Returns the underlying SQLite error on failure.
pub fn seed(conn: &Connection) -> Result<(), rusqlite::Error> {
    ensure_schema(conn)?;
    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO issuer_info (name, sector, rating) VALUES (?1, ?2, ?3)",
    )?;
    for (name, sector, rating) in SEED_ISSUERS {
        stmt.execute((name, sector, rating))?;
    }
    Ok(())
}

/// Dumps the `issuer_info` table: a tab-separated header followed by one
/// tuple-formatted row per issuer, ordered by name.
///
/// # Errors
///
/// Returns an SQLite error if the query fails, or an I/O error from the
/// writer.
pub fn dump(conn: &Connection, out: &mut impl Write) -> Result<(), DumpError> {
    writeln!(out, "name\tsector\trating")?;
    writeln!(out, "-----------------------------------")?;

    let mut stmt =
        conn.prepare("SELECT name, sector, rating FROM issuer_info ORDER BY name")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    for row in rows {
        writeln!(out, "{}", Tuple(row?))?;
    }
    Ok(())
}

/// Error dumping the issuer table.
#[derive(Debug, thiserror::Error)]
pub enum DumpError {
    #[error("query failed: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("write failed: {0}")]
    Io(#[from] io::Error),
}
