//! Test event generation for the plugin harness

use crate::driver::{EventType, PluginDataType, Row};
use chrono::Utc;
use rand::Rng;
use serde_json::{Value, json};

/// Supplies events for the harness to feed into a plugin
pub trait EventSource: Send {
    fn insert_data(&mut self) -> PluginDataType;

    /// Rows hold the old image followed by the new one
    fn update_data(&mut self) -> PluginDataType;

    fn delete_data(&mut self) -> PluginDataType;

    fn query_data(&mut self) -> PluginDataType;

    /// Event for `event_type`, `None` for commit which carries no payload
    fn next_event(&mut self, event_type: EventType) -> Option<PluginDataType> {
        match event_type {
            EventType::Insert => Some(self.insert_data()),
            EventType::Update => Some(self.update_data()),
            EventType::Delete => Some(self.delete_data()),
            EventType::Query => Some(self.query_data()),
            EventType::Commit => None,
        }
    }
}

/// Random single-row events against one table, with increasing binlog positions
pub struct RandomEventSource {
    schema_name: String,
    table_name: String,
    binlog_file_num: i32,
    binlog_position: u32,
    next_id: i64,
    last_row: Option<Row>,
}

impl RandomEventSource {
    pub fn new() -> Self {
        Self::with_table("bifrost_test", "binlog_field_test")
    }

    pub fn with_table<S: Into<String>, T: Into<String>>(schema_name: S, table_name: T) -> Self {
        Self {
            schema_name: schema_name.into(),
            table_name: table_name.into(),
            binlog_file_num: 1,
            binlog_position: 4,
            next_id: 1,
            last_row: None,
        }
    }

    fn advance_binlog(&mut self) -> (i32, u32) {
        let step = rand::thread_rng().gen_range(50..500);
        match self.binlog_position.checked_add(step) {
            Some(position) => self.binlog_position = position,
            None => {
                self.binlog_file_num += 1;
                self.binlog_position = 4;
            }
        }
        (self.binlog_file_num, self.binlog_position)
    }

    fn random_row(id: i64) -> Row {
        let mut rng = rand::thread_rng();
        let name: String = (0..rng.gen_range(4..12))
            .map(|_| rng.gen_range(b'a'..=b'z') as char)
            .collect();

        let mut row = Row::new();
        row.insert("id".to_string(), json!(id));
        row.insert("name".to_string(), Value::String(name));
        row.insert("score".to_string(), json!(rng.gen_range(0.0..100.0_f64)));
        row.insert("enabled".to_string(), json!(rng.gen_bool(0.5)));
        row.insert(
            "updated_at".to_string(),
            json!(Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()),
        );
        row.insert("note".to_string(), Value::Null);
        row
    }

    fn existing_row(&mut self) -> Row {
        match self.last_row.clone() {
            Some(row) => row,
            None => {
                let id = self.next_id;
                self.next_id += 1;
                Self::random_row(id)
            }
        }
    }

    fn event(&mut self, event_type: EventType, rows: Vec<Row>, query: String) -> PluginDataType {
        let (binlog_file_num, binlog_position) = self.advance_binlog();
        PluginDataType {
            timestamp: Utc::now().timestamp() as u32,
            event_type: event_type.as_str().to_string(),
            rows,
            query,
            schema_name: self.schema_name.clone(),
            table_name: self.table_name.clone(),
            binlog_file_num,
            binlog_position,
        }
    }
}

impl Default for RandomEventSource {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSource for RandomEventSource {
    fn insert_data(&mut self) -> PluginDataType {
        let id = self.next_id;
        self.next_id += 1;
        let row = Self::random_row(id);
        self.last_row = Some(row.clone());
        self.event(EventType::Insert, vec![row], String::new())
    }

    fn update_data(&mut self) -> PluginDataType {
        let old = self.existing_row();
        let id = old.get("id").cloned().unwrap_or(Value::Null);
        let mut new = Self::random_row(0);
        new.insert("id".to_string(), id);
        self.last_row = Some(new.clone());
        self.event(EventType::Update, vec![old, new], String::new())
    }

    fn delete_data(&mut self) -> PluginDataType {
        let row = self.existing_row();
        self.last_row = None;
        self.event(EventType::Delete, vec![row], String::new())
    }

    fn query_data(&mut self) -> PluginDataType {
        let query = format!(
            "ALTER TABLE `{}`.`{}` CHANGE COLUMN `note` `note` VARCHAR({}) NULL",
            self.schema_name,
            self.table_name,
            rand::thread_rng().gen_range(16..256)
        );
        self.event(EventType::Query, Vec::new(), query)
    }
}
