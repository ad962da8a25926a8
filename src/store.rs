//! SQLite-backed user store.
//!
//! Users live in a single `users` table. The `memberOf` column holds a
//! `;`-separated group list on disk and surfaces as a multi-valued attribute.

use crate::error::{Error, Result};
use crate::record::{AttrValue, Record};
use parking_lot::Mutex;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, OptionalExtension, Params, Row};
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

pub const COLUMNS: [&str; 13] = [
    "dn",
    "cn",
    "sAMAccountName",
    "uidNumber",
    "gidNumber",
    "memberOf",
    "mail",
    "sn",
    "givenName",
    "telephoneNumber",
    "accountExpires",
    "lockoutTime",
    "userAccountControl",
];

const INTEGER_COLUMNS: [&str; 3] = ["uidNumber", "gidNumber", "userAccountControl"];

const MEMBER_OF: &str = "memberOf";

pub struct UserStore {
    conn: Mutex<Connection>,
}

impl UserStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        debug!("Opening user store at {}", path.display());
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        ensure_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Loads users from a CSV file with a header row. Does nothing when the
    /// table already has rows or the file does not exist.
    pub fn seed_from_csv(&self, path: &Path) -> Result<usize> {
        if self.count()? > 0 {
            debug!("User store already populated, skipping seed");
            return Ok(0);
        }
        if !path.exists() {
            info!("Seed file {} not found, starting empty", path.display());
            return Ok(0);
        }

        let mut reader = csv::Reader::from_path(path)?;
        let mut rows = Vec::new();
        for (line, row) in reader.deserialize::<HashMap<String, String>>().enumerate() {
            let row = row?;
            let values = COLUMNS
                .iter()
                .map(|&column| {
                    let raw = row.get(column).map(String::as_str).unwrap_or("");
                    csv_value(column, raw).map_err(|e| match e {
                        Error::InvalidRecord(msg) => {
                            Error::InvalidRecord(format!("row {}: {}", line + 1, msg))
                        }
                        other => other,
                    })
                })
                .collect::<Result<Vec<SqlValue>>>()?;
            rows.push(values);
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(&insert_sql("INSERT OR IGNORE"))?;
            for values in rows {
                inserted += stmt.execute(params_from_iter(values))?;
            }
        }
        tx.commit()?;

        info!("Seeded {} users from {}", inserted, path.display());
        Ok(inserted)
    }

    pub fn all_users(&self) -> Result<Vec<Record>> {
        let conn = self.conn.lock();
        query_records(&conn, "SELECT * FROM users ORDER BY rowid", [])
    }

    /// Case-insensitive match of one column against `value`. The column name
    /// is resolved case-insensitively; an unknown column matches nothing.
    pub fn find_by_attribute(&self, key: &str, value: &str) -> Result<Vec<Record>> {
        let conn = self.conn.lock();
        let columns = table_columns(&conn)?;
        let Some(column) = resolve_column(&columns, key) else {
            debug!("Unknown user attribute {:?}", key);
            return Ok(Vec::new());
        };
        let sql = format!(
            "SELECT * FROM users WHERE lower(\"{}\") = lower(?1) ORDER BY rowid",
            column
        );
        query_records(&conn, &sql, [value])
    }

    pub fn get_by_account_name(&self, name: &str) -> Result<Option<Record>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT * FROM users WHERE lower(sAMAccountName) = lower(?1)")?;
        let columns = column_names(&stmt);
        let record = stmt
            .query_row([name], |row| row_to_record(row, &columns))
            .optional()?;
        Ok(record)
    }

    /// Inserts or replaces a user. `sAMAccountName` and `dn` must be present.
    pub fn create_user(&self, payload: &Map<String, JsonValue>) -> Result<()> {
        if !payload.contains_key("sAMAccountName") || !payload.contains_key("dn") {
            return Err(Error::InvalidRequest(
                "sAMAccountName and dn required".to_string(),
            ));
        }

        let values = COLUMNS
            .iter()
            .map(|&column| json_value(column, payload.get(column)))
            .collect::<Result<Vec<SqlValue>>>()?;

        let conn = self.conn.lock();
        conn.execute(&insert_sql("INSERT OR REPLACE"), params_from_iter(values))?;
        info!(
            "Stored user {}",
            payload.get("sAMAccountName").map(json_text).unwrap_or_default()
        );
        Ok(())
    }
}

fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            dn TEXT PRIMARY KEY,
            cn TEXT,
            sAMAccountName TEXT,
            uidNumber INTEGER,
            gidNumber INTEGER,
            memberOf TEXT,
            mail TEXT,
            sn TEXT,
            givenName TEXT,
            telephoneNumber TEXT,
            accountExpires TEXT,
            lockoutTime TEXT,
            userAccountControl INTEGER
        );",
    )?;
    Ok(())
}

fn insert_sql(verb: &str) -> String {
    let placeholders = (1..=COLUMNS.len())
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(",");
    format!(
        "{} INTO users ({}) VALUES ({})",
        verb,
        COLUMNS.join(","),
        placeholders
    )
}

fn table_columns(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("PRAGMA table_info(users)")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>("name"))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names)
}

fn resolve_column<'a>(columns: &'a [String], key: &str) -> Option<&'a str> {
    columns
        .iter()
        .find(|c| c.as_str() == key)
        .or_else(|| {
            let key_lower = key.to_lowercase();
            columns.iter().find(|c| c.to_lowercase() == key_lower)
        })
        .map(String::as_str)
}

fn column_names(stmt: &rusqlite::Statement<'_>) -> Vec<String> {
    stmt.column_names().into_iter().map(String::from).collect()
}

fn query_records<P: Params>(conn: &Connection, sql: &str, params: P) -> Result<Vec<Record>> {
    let mut stmt = conn.prepare(sql)?;
    let columns = column_names(&stmt);
    let records = stmt
        .query_map(params, |row| row_to_record(row, &columns))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(records)
}

fn row_to_record(row: &Row<'_>, columns: &[String]) -> rusqlite::Result<Record> {
    let mut record = Record::new();
    for (idx, name) in columns.iter().enumerate() {
        let value = match row.get_ref(idx)? {
            ValueRef::Null => AttrValue::Null,
            ValueRef::Integer(n) => AttrValue::Int(n),
            ValueRef::Real(f) => AttrValue::Str(f.to_string()),
            ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
                AttrValue::Str(String::from_utf8_lossy(bytes).into_owned())
            }
        };
        let value = if name == MEMBER_OF {
            split_groups(&value.as_text())
        } else {
            value
        };
        record.push(name.clone(), value);
    }
    Ok(record)
}

fn split_groups(raw: &str) -> AttrValue {
    AttrValue::Multi(
        raw.split(';')
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .map(String::from)
            .collect(),
    )
}

fn csv_value(column: &str, raw: &str) -> Result<SqlValue> {
    if !INTEGER_COLUMNS.contains(&column) {
        return Ok(SqlValue::Text(raw.to_string()));
    }
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(SqlValue::Integer(0));
    }
    trimmed
        .parse()
        .map(SqlValue::Integer)
        .map_err(|_| Error::InvalidRecord(format!("{} must be an integer, got {:?}", column, raw)))
}

fn json_value(column: &str, value: Option<&JsonValue>) -> Result<SqlValue> {
    if INTEGER_COLUMNS.contains(&column) {
        return json_int(column, value).map(SqlValue::Integer);
    }
    let text = match value {
        None | Some(JsonValue::Null) => String::new(),
        Some(JsonValue::Array(items)) if column == MEMBER_OF => {
            items.iter().map(json_text).collect::<Vec<_>>().join(";")
        }
        Some(other) => json_text(other),
    };
    Ok(SqlValue::Text(text))
}

fn json_int(column: &str, value: Option<&JsonValue>) -> Result<i64> {
    let invalid = || Error::InvalidRecord(format!("{} must be an integer", column));
    match value {
        None | Some(JsonValue::Null) => Ok(0),
        Some(JsonValue::Bool(b)) => Ok(i64::from(*b)),
        Some(JsonValue::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
            .ok_or_else(invalid),
        Some(JsonValue::String(s)) if s.trim().is_empty() => Ok(0),
        Some(JsonValue::String(s)) => s.trim().parse().map_err(|_| invalid()),
        Some(_) => Err(invalid()),
    }
}

fn json_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}
