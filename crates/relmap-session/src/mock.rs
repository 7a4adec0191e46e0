//! Recording connection for session tests.

use relmap_core::{
    Cascade, Command, Connection, Dialect, EntitySchema, FieldInfo, IsolationLevel,
    ListFieldInfo, Postgres, Result, Row, SchemaRegistry, SqlType, Value,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// Artist/Label model shared by the session tests.
pub(crate) fn registry() -> SchemaRegistry {
    let mut r = SchemaRegistry::new();
    r.register(
        EntitySchema::new("Artist")
            .field(FieldInfo::new("Alias", "Alias", SqlType::VarChar(50)).mandatory(true))
            .field(
                FieldInfo::reference("AnotherArtist", "AnotherArtist", "Artist")
                    .cascade(Cascade::Save),
            )
            .field(FieldInfo::reference("Label", "LabelId", "Label").cascade(Cascade::SaveDelete)),
    )
    .unwrap();
    r.register(
        EntitySchema::new("Label")
            .field(FieldInfo::new("Name", "Name", SqlType::Text))
            .list_field(
                ListFieldInfo::new("Artists", "Artist", "Label").cascade(Cascade::SaveDelete),
            ),
    )
    .unwrap();
    r
}

#[derive(Debug, Default)]
pub(crate) struct MockState {
    pub executed: Vec<(String, Vec<Value>)>,
    pub log: Vec<String>,
    pub rows: VecDeque<Vec<Row>>,
    pub scalars: VecDeque<Value>,
    pub affected: VecDeque<u64>,
    pub next_id: i64,
    pub open: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct MockConnection {
    state: Arc<Mutex<MockState>>,
}

impl MockConnection {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                next_id: 100,
                ..MockState::default()
            })),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn executed(&self) -> Vec<(String, Vec<Value>)> {
        self.state().executed.clone()
    }

    pub fn log(&self) -> Vec<String> {
        self.state().log.clone()
    }

    pub fn script_rows(&self, rows: Vec<Row>) {
        self.state().rows.push_back(rows);
    }

    pub fn script_scalar(&self, value: Value) {
        self.state().scalars.push_back(value);
    }

    pub fn script_affected(&self, affected: u64) {
        self.state().affected.push_back(affected);
    }

    fn record(&self, cmd: &Command) {
        self.state()
            .executed
            .push((cmd.text.clone(), cmd.values()));
    }
}

impl Connection for MockConnection {
    fn open(&mut self) -> Result<()> {
        let mut s = self.state();
        s.open = true;
        s.log.push("OPEN".to_string());
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let mut s = self.state();
        s.open = false;
        s.log.push("CLOSE".to_string());
        Ok(())
    }

    fn begin_transaction(&mut self, isolation: IsolationLevel) -> Result<()> {
        self.state()
            .log
            .push(format!("BEGIN {}", isolation.as_sql()));
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.state().log.push("COMMIT".to_string());
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.state().log.push("ROLLBACK".to_string());
        Ok(())
    }

    fn execute_non_query(&mut self, cmd: &Command) -> Result<u64> {
        self.record(cmd);
        Ok(self.state().affected.pop_front().unwrap_or(1))
    }

    fn execute_scalar(&mut self, cmd: &Command) -> Result<Value> {
        self.record(cmd);
        Ok(self.state().scalars.pop_front().unwrap_or(Value::Null))
    }

    fn execute_reader(&mut self, cmd: &Command) -> Result<Vec<Row>> {
        self.record(cmd);
        Ok(self.state().rows.pop_front().unwrap_or_default())
    }

    fn execute_insert(&mut self, cmd: &Command) -> Result<i64> {
        self.record(cmd);
        let mut s = self.state();
        let id = s.next_id;
        s.next_id += 1;
        Ok(id)
    }

    fn dialect(&self) -> &dyn Dialect {
        &Postgres
    }

    fn savepoint(&mut self, name: &str) -> Result<()> {
        self.state().log.push(format!("SAVEPOINT {}", name));
        Ok(())
    }

    fn rollback_to_savepoint(&mut self, name: &str) -> Result<()> {
        self.state().log.push(format!("ROLLBACK TO {}", name));
        Ok(())
    }

    fn release_savepoint(&mut self, name: &str) -> Result<()> {
        self.state().log.push(format!("RELEASE {}", name));
        Ok(())
    }
}

/// Row in the Artist column layout.
pub(crate) fn artist_row(id: i64, version: i64, alias: &str, another: Option<i64>) -> Row {
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
