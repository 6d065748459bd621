use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;
use time::OffsetDateTime;

use crate::db::{self, DbError};
use crate::models::Part;
use crate::workflows::RunReport;

pub type ID = String;

/// One finished run, ready to be stored.
#[derive(Debug)]
pub struct RunRecord<'a> {
    pub prompt: &'a str,
    pub model: &'a str,
    pub started_at: OffsetDateTime,
    pub report: &'a RunReport,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RunRow {
    pub id: ID,
    pub prompt: String,
    pub model: String,
    pub status: String,
    pub final_text: Option<String>,
    pub error: Option<String>,
    pub turns: i64,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub started_at: String,
    pub ended_at: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MessageRow {
    pub id: ID,
    pub run_id: ID,
    pub seq: i64,
    pub role: String, // user|model|tool
    pub content: String,
    pub parts_json: String,
    pub created_at: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ToolCallRow {
    pub id: ID,
    pub run_id: ID,
    pub seq: i64,
    pub call_id: String,
    pub name: String,
    pub args_json: String,
    pub result: String,
    pub error_kind: Option<String>,
    pub created_at: String,
}

/// SQLite-backed record of past runs.
pub struct TranscriptStore {
    conn: Connection,
}

impl TranscriptStore {
    pub fn open(db_path: &Path) -> Result<Self, DbError> {
        let conn = db::connect(db_path)?;
        db::init_db(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        db::init_db(&conn)?;
        Ok(Self { conn })
    }

    /// Store the run, its turns and its tool calls in one transaction.
    pub fn record_run(&mut self, record: &RunRecord<'_>) -> Result<ID, DbError> {
        let report = record.report;
        let run_id = new_id();
        let ended_at = now_iso();
        let (status, final_text, error) = match &report.outcome {
            Ok(text) => ("done", Some(text.clone()), None),
            Err(e) => (e.code(), None, Some(e.to_string())),
        };

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO runs (id, prompt, model, status, final_text, error, turns, prompt_tokens, completion_tokens, started_at, ended_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            rusqlite::params![
                &run_id,
                record.prompt,
                record.model,
                status,
                final_text,
                error,
                report.turns as i64,
                report.usage.prompt_tokens as i64,
                report.usage.completion_tokens as i64,
                format_iso(record.started_at),
                &ended_at,
            ],
        )?;

        let mut call_args: HashMap<&str, &Map<String, Value>> = HashMap::new();
        let mut tool_seq = 0i64;

        for (seq, turn) in report.conversation.turns().iter().enumerate() {
            tx.execute(
                "INSERT INTO messages (id, run_id, seq, role, content, parts_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    new_id(),
                    &run_id,
                    seq as i64,
                    turn.role.as_str(),
                    turn.text(),
                    serde_json::to_string(&turn.parts)?,
                    &ended_at,
                ],
            )?;

            for part in &turn.parts {
                match part {
                    Part::Call(call) => {
                        call_args.insert(&call.id, &call.arguments);
                    }
                    Part::Response(response) => {
                        let args_json = match call_args.get(response.call_id.as_str()) {
                            Some(args) => serde_json::to_string(args)?,
                            None => "{}".to_string(),
                        };
                        tx.execute(
                            "INSERT INTO tool_calls (id, run_id, seq, call_id, name, args_json, result, error_kind, created_at)
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                            rusqlite::params![
                                &new_id(),
                                &run_id,
                                tool_seq,
                                &response.call_id,
                                &response.name,
                                &args_json,
                                &response.content,
                                &response.error,
                                &ended_at,
                            ],
                        )?;
                        tool_seq += 1;
                    }
                    Part::Text { .. } => {}
                }
            }
        }

        tx.commit()?;
        Ok(run_id)
    }

    pub fn get_run(&self, run_id: &str) -> Result<RunRow, DbError> {
        let row = self.conn.query_row(
            "SELECT id, prompt, model, status, final_text, error, turns, prompt_tokens, completion_tokens, started_at, ended_at
             FROM runs WHERE id = ?1",
            [run_id],
            |r| {
                Ok(RunRow {
                    id: r.get(0)?,
                    prompt: r.get(1)?,
                    model: r.get(2)?,
                    status: r.get(3)?,
                    final_text: r.get(4)?,
                    error: r.get(5)?,
                    turns: r.get(6)?,
                    prompt_tokens: r.get(7)?,
                    completion_tokens: r.get(8)?,
                    started_at: r.get(9)?,
                    ended_at: r.get(10)?,
                })
            },
        )?;
        Ok(row)
    }

    pub fn list_messages(&self, run_id: &str) -> Result<Vec<MessageRow>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, run_id, seq, role, content, parts_json, created_at
             FROM messages WHERE run_id = ?1 ORDER BY seq ASC",
        )?;

        let rows = stmt.query_map([run_id], |r| {
            Ok(MessageRow {
                id: r.get(0)?,
                run_id: r.get(1)?,
                seq: r.get(2)?,
                role: r.get(3)?,
                content: r.get(4)?,
                parts_json: r.get(5)?,
                created_at: r.get(6)?,
            })
        })?;

        let mut out = vec![];
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn list_tool_calls(&self, run_id: &str) -> Result<Vec<ToolCallRow>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, run_id, seq, call_id, name, args_json, result, error_kind, created_at
             FROM tool_calls WHERE run_id = ?1 ORDER BY seq ASC",
        )?;

        let rows = stmt.query_map([run_id], |r| {
            Ok(ToolCallRow {
                id: r.get(0)?,
                run_id: r.get(1)?,
                seq: r.get(2)?,
                call_id: r.get(3)?,
                name: r.get(4)?,
                args_json: r.get(5)?,
                result: r.get(6)?,
                error_kind: r.get(7)?,
                created_at: r.get(8)?,
            })
        })?;

        let mut out = vec![];
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

fn format_iso(t: OffsetDateTime) -> String {
    t.format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

fn now_iso() -> String {
    format_iso(OffsetDateTime::now_utc())
}

fn new_id() -> ID {
    uuid::Uuid::new_v4().to_string()
}
