//! Durable record of sync trouble.
//!
//! Every WARN or ERROR event is written to a small SQLite table together
//! with the sync context it happened in: the stream being synced and the
//! pass number, taken from the `sync_stream` / `sync_pass` spans or from the
//! event itself. `pulse logs` reads it back.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

const SCHEMA: &str = "
    PRAGMA journal_mode = WAL;
    CREATE TABLE IF NOT EXISTS warnings (
        id         INTEGER PRIMARY KEY AUTOINCREMENT,
        at         TEXT NOT NULL,
        level      TEXT NOT NULL,
        target     TEXT NOT NULL,
        message    TEXT NOT NULL,
        stream     TEXT,
        pass       INTEGER,
        error_kind TEXT,
        fields     TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_warnings_stream ON warnings(stream, id);
";

// Every filter is optional: a NULL parameter disables its clause.
const SELECT: &str = "
    SELECT id, at, level, target, message, stream, pass, error_kind, fields
    FROM warnings
    WHERE (?1 IS NULL OR level = upper(?1))
      AND (?2 IS NULL OR instr(target, ?2) > 0)
      AND (?3 IS NULL OR stream = ?3)
      AND (?4 IS NULL OR at >= ?4)
    ORDER BY id DESC
    LIMIT ?5";

const DEFAULT_LIMIT: u32 = 100;

/// One persisted warning or error.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Warning {
    pub id: i64,
    /// RFC 3339, UTC.
    pub at: String,
    pub level: String,
    pub target: String,
    pub message: String,
    pub stream: Option<String>,
    /// Sync pass number within the process that logged it.
    pub pass: Option<u64>,
    pub error_kind: Option<String>,
    /// Remaining event fields as a JSON object.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Value>,
}

/// Filters for [`WarningLog::query`]. Unset filters match everything.
#[derive(Clone, Debug, Default)]
pub struct WarningQuery {
    /// `warn` or `error`, any case.
    pub level: Option<String>,
    /// Substring of the emitting module path.
    pub target: Option<String>,
    pub stream: Option<String>,
    /// RFC 3339 lower bound, inclusive.
    pub since: Option<String>,
    pub limit: Option<u32>,
}

/// Sync context carried by a span or an event.
#[derive(Clone, Debug, Default, PartialEq)]
struct SyncContext {
    stream: Option<String>,
    pass: Option<u64>,
}

impl SyncContext {
    /// Fill whatever `self` lacks from an outer context.
    fn inherit(&mut self, outer: &SyncContext) {
        if self.stream.is_none() {
            self.stream.clone_from(&outer.stream);
        }
        if self.pass.is_none() {
            self.pass = outer.pass;
        }
    }

    fn is_empty(&self) -> bool {
        self.stream.is_none() && self.pass.is_none()
    }
}

/// SQLite table of warnings and errors.
pub struct WarningLog {
    conn: Mutex<Connection>,
}

impl WarningLog {
    pub fn open(path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn record(&self, warning: &Warning) -> Result<(), rusqlite::Error> {
        let fields = warning.fields.as_ref().map(Value::to_string);
        self.conn.lock().execute(
            "INSERT INTO warnings (at, level, target, message, stream, pass, error_kind, fields)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                warning.at,
                warning.level,
                warning.target,
                warning.message,
                warning.stream,
                warning.pass.map(|p| p as i64),
                warning.error_kind,
                fields,
            ],
        )?;
        Ok(())
    }

    /// Newest first.
    pub fn query(&self, q: &WarningQuery) -> Result<Vec<Warning>, rusqlite::Error> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(SELECT)?;
        let rows = stmt.query_map(
            params![
                q.level,
                q.target,
                q.stream,
                q.since,
                q.limit.unwrap_or(DEFAULT_LIMIT),
            ],
            |row| {
                let fields: Option<String> = row.get(8)?;
                Ok(Warning {
                    id: row.get(0)?,
                    at: row.get(1)?,
                    level: row.get(2)?,
                    target: row.get(3)?,
                    message: row.get(4)?,
                    stream: row.get(5)?,
                    pass: row.get::<_, Option<i64>>(6)?.map(|p| p as u64),
                    error_kind: row.get(7)?,
                    fields: fields.and_then(|f| serde_json::from_str(&f).ok()),
                })
            },
        )?;
        rows.collect()
    }
}

/// Layer feeding WARN and ERROR events into a [`WarningLog`].
pub struct WarningLayer {
    log: Arc<WarningLog>,
}

impl WarningLayer {
    pub fn new(log: Arc<WarningLog>) -> Self {
        Self { log }
    }
}

/// Splits event or span fields into the sync context, the message, the
/// error kind and everything else.
#[derive(Default)]
struct Collector {
    context: SyncContext,
    message: Option<String>,
    error_kind: Option<String>,
    rest: Map<String, Value>,
}

impl Collector {
    fn put(&mut self, field: &Field, value: Value) {
        match field.name() {
            "message" => self.message = Some(into_text(value)),
            "stream" => self.context.stream = Some(into_text(value)),
            "error_kind" => self.error_kind = Some(into_text(value)),
            "pass" => self.context.pass = value.as_u64(),
            name => {
                self.rest.insert(name.to_string(), value);
            }
        }
    }
}

fn into_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

impl Visit for Collector {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, Value::from(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, Value::from(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.put(field, Value::from(format!("{value:?}")));
    }
}

impl<S> Layer<S> for WarningLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let mut collector = Collector::default();
        attrs.record(&mut collector);
        if collector.context.is_empty() {
            return;
        }
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(collector.context);
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let meta = event.metadata();
        if *meta.level() > Level::WARN {
            return;
        }

        let mut collector = Collector::default();
        event.record(&mut collector);
        if let Some(scope) = ctx.event_scope(event) {
            // Leaf to root, so inner spans take precedence
            for span in scope {
                if let Some(outer) = span.extensions().get::<SyncContext>() {
                    collector.context.inherit(outer);
                }
            }
        }

        let warning = Warning {
            id: 0,
            at: Utc::now().to_rfc3339(),
            level: meta.level().to_string(),
            target: meta.target().to_string(),
            message: collector.message.unwrap_or_default(),
            stream: collector.context.stream,
            pass: collector.context.pass,
            error_kind: collector.error_kind,
            fields: (!collector.rest.is_empty()).then(|| Value::Object(collector.rest)),
        };
        if let Err(e) = self.log.record(&warning) {
            eprintln!("pulse-telemetry: failed to persist warning: {e}");
        }
    }
}
