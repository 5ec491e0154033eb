use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Change operation carried by a CDC envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    #[serde(rename = "c")]
    Create,
    #[serde(rename = "u")]
    Update,
    #[serde(rename = "d")]
    Delete,
    /// Row emitted by an initial or incremental snapshot.
    #[serde(rename = "r")]
    Read,
}

impl Operation {
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "c" => Some(Operation::Create),
            "u" => Some(Operation::Update),
            "d" => Some(Operation::Delete),
            "r" => Some(Operation::Read),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Operation::Create => "c",
            Operation::Update => "u",
            Operation::Delete => "d",
            Operation::Read => "r",
        }
    }

    pub fn requires_before(&self) -> bool {
        matches!(self, Operation::Update | Operation::Delete)
    }

    pub fn requires_after(&self) -> bool {
        !matches!(self, Operation::Delete)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Row image of the watched `users` table.
///
/// Every column may be missing or `null` and then takes its zero value, so a
/// key-only `before` image (as sent for deletes under the default replica
/// identity) still decodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserRecord {
    #[serde(deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub email: String,
    #[serde(deserialize_with = "null_as_default")]
    pub password_hash: String,
    #[serde(deserialize_with = "null_as_default")]
    pub phone_no: String,
    #[serde(deserialize_with = "null_as_default")]
    pub wallet_address: String,
    #[serde(deserialize_with = "null_as_default")]
    pub subscribed: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub created_at: DateTime<Utc>,
    #[serde(deserialize_with = "null_as_default")]
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Connector metadata describing where a change came from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceInfo {
    #[serde(deserialize_with = "null_as_default")]
    pub version: String,
    #[serde(deserialize_with = "null_as_default")]
    pub connector: String,
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub ts_ms: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub ts_us: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub ts_ns: i64,
    /// Producers send either a boolean or a marker string (`"true"`,
    /// `"last"`, `"incremental"`, ...); anything but `false` means the row
    /// came from a snapshot.
    #[serde(deserialize_with = "snapshot_flag")]
    pub snapshot: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub db: String,
    #[serde(deserialize_with = "string_or_number")]
    pub sequence: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub schema: String,
    #[serde(deserialize_with = "null_as_default")]
    pub table: String,
    #[serde(rename = "txId", deserialize_with = "string_or_number")]
    pub tx_id: Option<String>,
    pub lsn: Option<i64>,
}

/// Wire envelope: informational schema plus the change payload.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Envelope {
    pub schema: Option<serde_json::Value>,
    #[serde(deserialize_with = "null_as_default")]
    pub payload: Payload,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Payload {
    pub before: Option<UserRecord>,
    pub after: Option<UserRecord>,
    #[serde(deserialize_with = "null_as_default")]
    pub source: SourceInfo,
    /// Empty when absent or `null`.
    #[serde(deserialize_with = "null_as_default")]
    pub op: String,
    #[serde(deserialize_with = "null_as_default")]
    pub ts_ms: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub ts_us: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub ts_ns: i64,
}

/// A validated change to one user row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub operation: Operation,
    /// Set for updates and deletes only.
    pub before: Option<UserRecord>,
    /// Set for creates, updates and snapshot reads only.
    pub after: Option<UserRecord>,
    pub source: SourceInfo,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// The most recent row image: `after`, or `before` for deletes.
    pub fn record(&self) -> Option<&UserRecord> {
        match self.operation {
            Operation::Delete => self.before.as_ref(),
            _ => self.after.as_ref(),
        }
    }
}

/// Treats an explicit `null` like a missing key.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn snapshot_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    Ok(match Option::<Flag>::deserialize(deserializer)? {
        None => false,
        Some(Flag::Bool(flag)) => flag,
        Some(Flag::Text(text)) => !(text.is_empty() || text.eq_ignore_ascii_case("false")),
    })
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Value {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(Option::<Value>::deserialize(deserializer)?.map(|value| match value {
        Value::Text(text) => text,
        Value::Number(number) => number.to_string(),
    }))
}
