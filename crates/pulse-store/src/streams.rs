use tracing::{debug, instrument};

use pulse_core::types::StreamDescriptor;

use crate::database::Database;
use crate::error::StoreError;

/// Registry of streams producers have declared, with their schemas.
#[derive(Clone)]
pub struct StreamRegistry {
    db: Database,
}

impl StreamRegistry {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Register a stream or replace its schema. Last write wins.
    #[instrument(skip(self, schema))]
    pub fn ensure(&self, name: &str, schema: &str) -> Result<(), StoreError> {
        debug!(stream = name, "ensuring stream");
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO streams (name, schema) VALUES (?1, ?2)
                 ON CONFLICT(name) DO UPDATE SET schema = excluded.schema",
                [name, schema],
            )?;
            Ok(())
        })
    }

    /// All registered streams. Callers must not rely on the order.
    pub fn list(&self) -> Result<Vec<StreamDescriptor>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT name, schema FROM streams")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(StreamDescriptor {
                        name: row.get(0)?,
                        schema: row.get(1)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM streams", [], |row| row.get(0))?;
            Ok(n as usize)
        })
    }
}
