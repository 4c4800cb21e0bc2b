use tracing::{debug, instrument};

use pulse_core::types::QueuedEvent;

use crate::database::Database;
use crate::error::StoreError;

/// Durable, append-only log of data points waiting for upload.
///
/// Producers append; only the sync engine deletes, and only after the remote
/// confirmed a batch.
#[derive(Clone)]
pub struct EventQueue {
    db: Database,
}

impl EventQueue {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append a point. Duplicate timestamps are accepted; dedup happens at sync time.
    /// Infinite and NaN timestamps are refused.
    pub fn append(&self, stream: &str, timestamp: f64, payload: &str) -> Result<i64, StoreError> {
        if !timestamp.is_finite() {
            return Err(StoreError::InvalidTimestamp(timestamp));
        }
        debug!(stream, timestamp, payload, "queue append");
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO queue (stream, timestamp, payload) VALUES (?1, ?2, ?3)",
                rusqlite::params![stream, timestamp, payload],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// All queued points of a stream, ascending by timestamp, ties in insertion order.
    /// Does not delete anything.
    #[instrument(skip(self))]
    pub fn drain(&self, stream: &str) -> Result<Vec<QueuedEvent>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, stream, timestamp, payload FROM queue
                 WHERE stream = ?1
                 ORDER BY timestamp ASC, id ASC",
            )?;
            let mut rows = stmt.query([stream])?;
            let mut events = Vec::new();
            while let Some(row) = rows.next()? {
                events.push(row_to_event(row)?);
            }
            Ok(events)
        })
    }

    /// Delete every row of `stream` with `timestamp <= bound`, in one statement.
    /// Rows appended concurrently above the bound survive.
    #[instrument(skip(self))]
    pub fn delete_up_to(&self, stream: &str, bound: f64) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM queue WHERE stream = ?1 AND timestamp <= ?2",
                rusqlite::params![stream, bound],
            )?;
            Ok(deleted)
        })
    }

    /// Delete rows of `stream` whose timestamp is not a finite number. Such rows
    /// can only come from databases written outside [`EventQueue::append`].
    #[instrument(skip(self))]
    pub fn discard_non_finite(&self, stream: &str) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM queue WHERE stream = ?1
                 AND (timestamp IS NULL OR abs(timestamp) > 1.7976931348623157e308)",
                [stream],
            )?;
            Ok(deleted)
        })
    }

    /// Total queued rows across all streams.
    pub fn size(&self) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM queue", [], |row| row.get(0))?;
            Ok(n as usize)
        })
    }

    pub fn size_of(&self, stream: &str) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM queue WHERE stream = ?1",
                [stream],
                |row| row.get(0),
            )?;
            Ok(n as usize)
        })
    }

    /// Drop every queued row. Streams, settings and checkpoints are untouched.
    pub fn clear(&self) -> Result<usize, StoreError> {
        self.db
            .with_conn(|conn| Ok(conn.execute("DELETE FROM queue", [])?))
    }
}

fn row_to_event(row: &rusqlite::Row<'_>) -> Result<QueuedEvent, StoreError> {
    let corrupt = |column: &'static str| {
        move |e: rusqlite::Error| StoreError::CorruptRow {
            table: "queue",
            column,
            detail: e.to_string(),
        }
    };
    Ok(QueuedEvent {
        id: row.get(0).map_err(corrupt("id"))?,
        stream: row.get(1).map_err(corrupt("stream"))?,
        timestamp: row.get(2).map_err(corrupt("timestamp"))?,
        payload: row.get(3).map_err(corrupt("payload"))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> EventQueue {
        EventQueue::new(Database::in_memory().unwrap())
    }

    fn timestamps(events: &[QueuedEvent]) -> Vec<f64> {
        events.iter().map(|e| e.timestamp).collect()
    }

    #[test]
    fn drain_is_ascending() {
        let q = queue();
        q.append("x", 1.0, "a").unwrap();
        q.append("x", 2.0, "b").unwrap();
        q.append("x", 1.5, "c").unwrap();

        let events = q.drain("x").unwrap();
        assert_eq!(timestamps(&events), vec![1.0, 1.5, 2.0]);
        let payloads: Vec<&str> = events.iter().map(|e| e.payload.as_str()).collect();
        assert_eq!(payloads, vec!["a", "c", "b"]);
    }

    #[test]
    fn drain_does_not_delete() {
        let q = queue();
        q.append("x", 1.0, "a").unwrap();
        q.drain("x").unwrap();
        assert_eq!(q.size().unwrap(), 1);
    }

    #[test]
    fn drain_only_named_stream() {
        let q = queue();
        q.append("x", 1.0, "a").unwrap();
        q.append("y", 0.5, "b").unwrap();
        let events = q.drain("x").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].stream, "x");
    }

    #[test]
    fn duplicate_timestamps_keep_insertion_order() {
        let q = queue();
        let first = q.append("x", 3.0, "first").unwrap();
        let second = q.append("x", 3.0, "second").unwrap();
        assert!(second > first);

        let events = q.drain("x").unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].payload, "first");
        assert_eq!(events[1].payload, "second");
    }

    #[test]
    fn subsecond_precision_preserved() {
        let q = queue();
        q.append("x", 1_700_000_000.123, "a").unwrap();
        assert_eq!(q.drain("x").unwrap()[0].timestamp, 1_700_000_000.123);
    }

    #[test]
    fn delete_up_to_is_inclusive_and_scoped() {
        let q = queue();
        q.append("x", 1.0, "a").unwrap();
        q.append("x", 2.0, "b").unwrap();
        q.append("x", 3.0, "c").unwrap();
        q.append("y", 1.0, "other").unwrap();

        assert_eq!(q.delete_up_to("x", 2.0).unwrap(), 2);
        assert_eq!(timestamps(&q.drain("x").unwrap()), vec![3.0]);
        assert_eq!(q.size_of("y").unwrap(), 1);
    }

    #[test]
    fn append_after_drain_survives_delete() {
        let q = queue();
        q.append("x", 1.0, "a").unwrap();
        let drained = q.drain("x").unwrap();
        q.append("x", 5.0, "late").unwrap();

        let bound = drained.last().unwrap().timestamp;
        q.delete_up_to("x", bound).unwrap();

        let left = q.drain("x").unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].payload, "late");
    }

    #[test]
    fn append_refuses_non_finite_timestamps() {
        let q = queue();
        for bad in [f64::INFINITY, f64::NEG_INFINITY, f64::NAN] {
            assert!(matches!(
                q.append("x", bad, "bad"),
                Err(StoreError::InvalidTimestamp(_))
            ));
        }
        assert_eq!(q.size().unwrap(), 0);
    }

    #[test]
    fn discard_non_finite_leaves_real_points() {
        let q = queue();
        q.append("x", 1.0, "real").unwrap();
        q.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO queue (stream, timestamp, payload) VALUES ('x', ?1, 'bad')",
                [f64::INFINITY],
            )?;
            Ok(())
        })
        .unwrap();

        assert_eq!(q.discard_non_finite("x").unwrap(), 1);
        let left = q.drain("x").unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].payload, "real");
    }

    #[test]
    fn size_counts_all_streams() {
        let q = queue();
        assert_eq!(q.size().unwrap(), 0);
        q.append("x", 1.0, "a").unwrap();
        q.append("y", 1.0, "b").unwrap();
        q.append("y", 2.0, "c").unwrap();
        assert_eq!(q.size().unwrap(), 3);
        assert_eq!(q.size_of("y").unwrap(), 2);
    }

    #[test]
    fn clear_empties_queue() {
        let q = queue();
        q.append("x", 1.0, "a").unwrap();
        q.append("y", 1.0, "b").unwrap();
        assert_eq!(q.clear().unwrap(), 2);
        assert_eq!(q.size().unwrap(), 0);
    }

    #[test]
    fn concurrent_appends_all_land() {
        let q = queue();
        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let q = q.clone();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        q.append("x", (worker * 100 + i) as f64, "p").unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(q.size().unwrap(), 100);
    }
}
