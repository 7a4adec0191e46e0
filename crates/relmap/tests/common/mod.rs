//! Shared fixtures: a music catalog model and a recording connection.

#![allow(dead_code)]

use relmap::{
    Cascade, Command, Connection, Dialect, DialectKind, EntitySchema, FieldInfo, IsolationLevel,
    ListFieldInfo, Result, Row, SchemaRegistry, SqlType, Value,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

pub const ARTIST_COLUMNS: &str = "artist.Id, artist.Deleted, artist.Version, artist.Alias, artist.AnotherArtist, artist.LabelId";

pub fn catalog() -> Arc<SchemaRegistry> {
    let mut r = SchemaRegistry::new();
    r.register(
        EntitySchema::new("Artist")
            .field(FieldInfo::new("Alias", "Alias", SqlType::VarChar(50)).mandatory(true))
            .field(
                FieldInfo::reference("AnotherArtist", "AnotherArtist", "Artist")
                    .mandatory(true)
                    .cascade(Cascade::Save),
            )
            .field(FieldInfo::reference("Label", "LabelId", "Label").cascade(Cascade::Save)),
    )
    .unwrap();
    r.register(
        EntitySchema::new("Label")
            .field(FieldInfo::new("Name", "Name", SqlType::VarChar(100)))
            .list_field(
                ListFieldInfo::new("Artists", "Artist", "Label").cascade(Cascade::SaveDelete),
            ),
    )
    .unwrap();
    r.finish().unwrap()
}

#[derive(Debug, Default)]
pub struct Recorded {
    /// Every statement sent, savepoint statements included.
    pub statements: Vec<(String, Vec<Value>)>,
    /// Connection and transaction lifecycle calls.
    pub lifecycle: Vec<String>,
    pub rows: VecDeque<Vec<Row>>,
    pub scalars: VecDeque<Value>,
    pub affected: VecDeque<u64>,
    pub next_id: i64,
}

/// Connection that records what it is asked to do.
#[derive(Debug, Clone)]
pub struct RecordingConnection {
    kind: DialectKind,
    recorded: Arc<Mutex<Recorded>>,
}

impl RecordingConnection {
    pub fn new(kind: DialectKind) -> Self {
        Self {
            kind,
            recorded: Arc::new(Mutex::new(Recorded {
                next_id: 1,
                ..Recorded::default()
            })),
        }
    }

    pub fn recorded(&self) -> MutexGuard<'_, Recorded> {
        self.recorded.lock().unwrap()
    }

    pub fn statements(&self) -> Vec<String> {
        self.recorded()
            .statements
            .iter()
            .map(|(sql, _)| sql.clone())
            .collect()
    }

    pub fn parameters(&self, index: usize) -> Vec<Value> {
        self.recorded().statements[index].1.clone()
    }

    pub fn lifecycle(&self) -> Vec<String> {
        self.recorded().lifecycle.clone()
    }

    pub fn returns_rows(&self, rows: Vec<Row>) {
        self.recorded().rows.push_back(rows);
    }

    pub fn returns_scalar(&self, value: Value) {
        self.recorded().scalars.push_back(value);
    }

    pub fn affects(&self, rows: u64) {
        self.recorded().affected.push_back(rows);
    }

    fn record(&self, cmd: &Command) {
        self.recorded()
            .statements
            .push((cmd.text.clone(), cmd.values()));
    }
}

impl Connection for RecordingConnection {
    fn open(&mut self) -> Result<()> {
        self.recorded().lifecycle.push("open".to_string());
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.recorded().lifecycle.push("close".to_string());
        Ok(())
    }

    fn begin_transaction(&mut self, isolation: IsolationLevel) -> Result<()> {
        self.recorded()
            .lifecycle
            .push(format!("begin {}", isolation.as_sql()));
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.recorded().lifecycle.push("commit".to_string());
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.recorded().lifecycle.push("rollback".to_string());
        Ok(())
    }

    fn execute_non_query(&mut self, cmd: &Command) -> Result<u64> {
        self.record(cmd);
        Ok(self.recorded().affected.pop_front().unwrap_or(1))
    }

    fn execute_scalar(&mut self, cmd: &Command) -> Result<Value> {
        self.record(cmd);
        Ok(self.recorded().scalars.pop_front().unwrap_or(Value::Null))
    }

    fn execute_reader(&mut self, cmd: &Command) -> Result<Vec<Row>> {
        self.record(cmd);
        Ok(self.recorded().rows.pop_front().unwrap_or_default())
    }

    fn execute_insert(&mut self, cmd: &Command) -> Result<i64> {
        self.record(cmd);
        let mut recorded = self.recorded();
        let id = recorded.next_id;
        recorded.next_id += 1;
        Ok(id)
    }

    fn dialect(&self) -> &dyn Dialect {
        self.kind.adapter()
    }
}

pub fn artist_row(id: i64, version: i64, alias: &str, another: Option<i64>) -> Row {
    Row::new(
        ["Id", "Deleted", "Version", "Alias", "AnotherArtist", "LabelId"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        vec![
            Value::BigInt(id),
            Value::Bool(false),
            Value::BigInt(version),
            Value::from(alias),
            another.map_or(Value::Null, Value::BigInt),
            Value::Null,
        ],
    )
}
