use anyhow::Result;
use rusqlite::Connection;

use super::AuditEntry;

const CSV_HEADER: &str = "id,timestamp,request_id,session_id,agent_id,role,stage,check_name,action,reason";

/// Export every entry as a pretty-printed JSON array, newest first.
pub fn export_json(conn: &Connection) -> Result<String> {
    let entries = super::query_recent(conn, usize::MAX)?;
    Ok(serde_json::to_string_pretty(&entries)?)
}

/// Export every entry as RFC 4180 CSV, newest first.
pub fn export_csv(conn: &Connection) -> Result<String> {
    let entries = super::query_recent(conn, usize::MAX)?;
    let mut output = String::from(CSV_HEADER);
    output.push('\n');
    for entry in &entries {
        output.push_str(&csv_row(entry));
        output.push('\n');
    }
    Ok(output)
}

fn csv_row(entry: &AuditEntry) -> String {
    [
        entry.id.unwrap_or(0).to_string(),
        entry.timestamp.clone(),
        entry.request_id.clone(),
        entry.session_id.clone(),
        entry.agent_id.clone(),
        entry.role.clone().unwrap_or_default(),
        entry.stage.clone(),
        entry.check_name.clone(),
        entry.action.clone(),
        entry.reason.clone(),
    ]
    .iter()
    .map(|field| csv_field(field))
    .collect::<Vec<_>>()
    .join(",")
}

/// Quote a field when it contains a delimiter, quote or line break.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
