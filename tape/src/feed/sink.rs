//! SQLite sink for drained trade records.
//!
//! Each sink owns its own connection; several sinks may point at the same
//! database file and SQLite serializes the writes. Inserts are batched into
//! transactions to amortize fsync cost.

use std::path::Path;

use rusqlite::Connection;

use crate::feed::types::EnrichedTrade;

/// Error writing to the trade store.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("failed to open trade store: {0}")]
    Open(rusqlite::Error),
    #[error("insert failed: {0}")]
    Insert(#[from] rusqlite::Error),
}

/// A SQLite-backed sink for enriched trades.
pub struct TradeSink {
    conn: Connection,
}

impl TradeSink {
    /// Opens (or creates) the trade store at `path` and ensures the schema.
    ///
    /// WAL mode keeps concurrent sink connections from blocking each other
    /// on reads while one of them writes.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Open`] if the database cannot be opened or
    /// configured.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SinkError> {
        let conn = Connection::open(path).map_err(SinkError::Open)?;

        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA busy_timeout=5000;",
        )
        .map_err(SinkError::Open)?;

        let sink = Self { conn };
        sink.ensure_schema().map_err(SinkError::Open)?;
        Ok(sink)
    }

    fn ensure_schema(&self) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS trades (
                control_id TEXT NOT NULL,
                cusip TEXT NOT NULL,
                issuer TEXT NOT NULL,
                exec_time TEXT NOT NULL,
                report_time TEXT NOT NULL,
                price REAL NOT NULL,
                volume INTEGER NOT NULL,
                side TEXT NOT NULL,
                dealer_id INTEGER NOT NULL,
                reporting_capacity TEXT NOT NULL,
                modifier3 TEXT NOT NULL,
                coupon REAL NOT NULL,
                maturity TEXT NOT NULL,
                report_delay_secs INTEGER NOT NULL,
                late INTEGER NOT NULL,
                sector TEXT,
                rating TEXT
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_trades_cusip ON trades(cusip)",
            [],
        )?;

        Ok(())
    }

    /// Inserts a batch of trades in a single transaction.
    ///
    /// Returns the number of rows written.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Insert`] and writes nothing if any insert in the
    /// batch fails.
    pub fn insert_batch(&mut self, batch: &[EnrichedTrade]) -> Result<usize, SinkError> {
        if batch.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO trades (
                    control_id, cusip, issuer, exec_time, report_time,
                    price, volume, side, dealer_id, reporting_capacity,
                    modifier3, coupon, maturity, report_delay_secs, late,
                    sector, rating
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            )?;

            for item in batch {
                let t = &item.trade;
                stmt.execute(rusqlite::params![
                    t.control_id,
                    t.cusip,
                    t.issuer,
                    t.exec_time.to_rfc3339(),
                    t.report_time.to_rfc3339(),
                    t.price,
                    t.volume,
                    t.side.as_str(),
                    t.dealer_id,
                    t.reporting_capacity.as_str(),
                    t.modifier3,
                    t.coupon,
                    t.maturity.to_string(),
                    item.report_delay_secs,
                    item.late,
                    item.sector,
                    item.rating,
                ])?;
            }
        }
        tx.commit()?;

        Ok(batch.len())
    }

    /// Number of rows currently in the `trades` table.
    ///
    /// # Errors
    ///
    /// Returns the underlying SQLite error on failure.
    pub fn count(&self) -> Result<u64, SinkError> {
        let n: u64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM trades", [], |row| row.get(0))?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::issuers::IssuerTable;
    use crate::feed::types::{ReportingCapacity, Side, Trade};
    use chrono::{NaiveDate, TimeZone, Utc};

    fn enriched(i: u32, delay_secs: i64) -> EnrichedTrade {
        let exec = Utc.with_ymd_and_hms(2025, 6, 2, 14, 0, 0).unwrap();
        Trade {
            control_id: format!("CTRL{i:06}"),
            cusip: "037833100".to_string(),
            issuer: "Apple".to_string(),
            exec_time: exec,
            report_time: exec + chrono::TimeDelta::seconds(delay_secs),
            price: 100.0 + f64::from(i),
            volume: 500_000,
            side: if i % 2 == 0 { Side::Buy } else { Side::Sell },
            dealer_id: 1000 + i,
            reporting_capacity: ReportingCapacity::Principal,
            modifier3: String::new(),
            coupon: 3.0,
            maturity: NaiveDate::from_ymd_opt(2031, 1, 1).unwrap(),
        }
        .enrich(&IssuerTable::empty())
    }

    fn temp_db(tag: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("tape-sink-{tag}-{}.db", std::process::id()))
    }

    #[test]
    fn test_insert_and_count() {
        let path = temp_db("insert");
        let _ = std::fs::remove_file(&path);

        let mut sink = TradeSink::open(&path).unwrap();
        let batch: Vec<EnrichedTrade> = (0..10).map(|i| enriched(i, 60)).collect();

        assert_eq!(sink.insert_batch(&batch).unwrap(), 10);
        assert_eq!(sink.count().unwrap(), 10);

        // A second batch appends.
        assert_eq!(sink.insert_batch(&batch[..3]).unwrap(), 3);
        assert_eq!(sink.count().unwrap(), 13);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let path = temp_db("empty");
        let _ = std::fs::remove_file(&path);

        let mut sink = TradeSink::open(&path).unwrap();
        assert_eq!(sink.insert_batch(&[]).unwrap(), 0);
        assert_eq!(sink.count().unwrap(), 0);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_late_flag_persisted() {
        let path = temp_db("late");
        let _ = std::fs::remove_file(&path);

        let mut sink = TradeSink::open(&path).unwrap();
        sink.insert_batch(&[enriched(0, 60), enriched(1, 3600)])
            .unwrap();

        let late_count: u64 = sink
            .conn
            .query_row("SELECT COUNT(*) FROM trades WHERE late = 1", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(late_count, 1);

        let _ = std::fs::remove_file(&path);
    }
}
