//! Intercepted query events delivered by the connector.

use serde::{Deserialize, Serialize};

/// One executed query as observed by the interception layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryEvent {
    /// Wall-clock start of the execution, epoch milliseconds.
    pub timestamp_millis: i64,
    pub execution_duration_micros: u64,
    pub client_address: String,
    pub statement: String,
    pub keyspace: String,
    pub table: String,
}

impl QueryEvent {
    /// Build an event stamped with the current time.
    pub fn new(
        execution_duration_micros: u64,
        client_address: impl Into<String>,
        statement: impl Into<String>,
        keyspace: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            timestamp_millis: chrono::Utc::now().timestamp_millis(),
            execution_duration_micros,
            client_address: client_address.into(),
            statement: statement.into(),
            keyspace: keyspace.into(),
            table: table.into(),
        }
    }

    pub fn with_timestamp(mut self, timestamp_millis: i64) -> Self {
        self.timestamp_millis = timestamp_millis;
        self
    }
}
