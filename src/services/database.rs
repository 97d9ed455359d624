use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::ToSql;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::task;

use crate::config::{APP_NAME, DB_PATH_ENV};
use crate::models::{
    ActionAuditEntry, ActionType, Conversation, ConversationSummary, Invoice, InvoiceStatus,
    Message, MessageMetadata, NewMessage, Outcome, PendingProposal, Role,
};
use crate::records::{PageRequest, RecordFilter, RecordPage, RecordPatch, RecordStore, StoreError};

const PREVIEW_CHARS: i64 = 100;

#[derive(Debug, Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|_| anyhow!("database connection mutex poisoned"))
}

impl Database {
    pub async fn new() -> Result<Self> {
        let path = Self::db_path()?;
        Self::open(&path).await
    }

    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create data directory: {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;

        Ok(db)
    }

    /// Create an in-memory database (used for testing)
    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn db_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var(DB_PATH_ENV) {
            return Ok(PathBuf::from(path));
        }
        let data_dir = match std::env::var("XDG_DATA_HOME") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => {
                let home = std::env::var("HOME")
                    .context("Neither XDG_DATA_HOME nor HOME is set")?;
                PathBuf::from(home).join(".local/share")
            }
        };
        Ok(data_dir.join(APP_NAME).join(format!("{}.db", APP_NAME)))
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = lock(&self.conn)?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER NOT NULL
            );",
        )?;

        let version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if version < 1 {
            conn.execute_batch(
                "CREATE TABLE conversations (
                    id TEXT PRIMARY KEY,
                    owner_id TEXT NOT NULL,
                    title TEXT,
                    archived INTEGER NOT NULL DEFAULT 0,
                    context TEXT NOT NULL DEFAULT '{}',
                    pending_proposal TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE messages (
                    id TEXT PRIMARY KEY,
                    conversation_id TEXT NOT NULL,
                    seq INTEGER NOT NULL,
                    role TEXT NOT NULL,
                    content TEXT NOT NULL,
                    record_ids TEXT NOT NULL DEFAULT '[]',
                    proposed_action TEXT,
                    model TEXT,
                    tokens_in BIGINT,
                    tokens_out BIGINT,
                    metadata TEXT NOT NULL DEFAULT '{}',
                    created_at TEXT NOT NULL,
                    UNIQUE (conversation_id, seq),
                    FOREIGN KEY (conversation_id) REFERENCES conversations(id)
                );

                CREATE TABLE settings (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );

                CREATE INDEX idx_conversations_owner ON conversations(owner_id, updated_at DESC);
                CREATE INDEX idx_messages_conversation ON messages(conversation_id, seq);

                INSERT INTO schema_version (version) VALUES (1);",
            )?;
        }

        if version < 2 {
            conn.execute_batch(
                "CREATE TABLE action_audit (
                    id TEXT PRIMARY KEY,
                    conversation_id TEXT NOT NULL,
                    message_id TEXT NOT NULL,
                    action_type TEXT NOT NULL,
                    record_id TEXT,
                    record_ids TEXT NOT NULL DEFAULT '[]',
                    before_value TEXT,
                    after_value TEXT,
                    outcome TEXT NOT NULL,
                    failure_reason TEXT,
                    confirmed_by_user INTEGER NOT NULL,
                    unchanged INTEGER NOT NULL DEFAULT 0,
                    actor_id TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    FOREIGN KEY (conversation_id) REFERENCES conversations(id)
                );
                CREATE INDEX idx_audit_record ON action_audit(actor_id, record_id, created_at);
                CREATE INDEX idx_audit_conversation ON action_audit(conversation_id, created_at);

                UPDATE schema_version SET version = 2;",
            )?;
        }

        if version < 3 {
            conn.execute_batch(
                "CREATE TABLE invoices (
                    id TEXT NOT NULL,
                    owner_id TEXT NOT NULL,
                    vendor TEXT NOT NULL,
                    amount_cents BIGINT NOT NULL,
                    status TEXT NOT NULL,
                    issue_date TEXT NOT NULL,
                    due_date TEXT NOT NULL,
                    notes TEXT NOT NULL DEFAULT '[]',
                    updated_at TEXT NOT NULL,
                    PRIMARY KEY (owner_id, id)
                );
                CREATE INDEX idx_invoices_status ON invoices(owner_id, status);

                UPDATE schema_version SET version = 3;",
            )?;
        }

        Ok(())
    }

    // --- Conversations ---

    pub async fn insert_conversation(&self, conversation: &Conversation) -> Result<()> {
        let conn = self.conn.clone();
        let conv = conversation.clone();
        task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let pending = conv
                .pending_proposal
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            conn.execute(
                "INSERT INTO conversations (id, owner_id, title, archived, context, pending_proposal, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    conv.id,
                    conv.owner_id,
                    conv.title,
                    conv.archived as i32,
                    serde_json::to_string(&conv.context)?,
                    pending,
                    conv.created_at.to_rfc3339(),
                    conv.updated_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await?
    }

    pub async fn get_conversation(&self, owner_id: &str, id: &str) -> Result<Option<Conversation>> {
        let conn = self.conn.clone();
        let owner_id = owner_id.to_string();
        let id = id.to_string();
        task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let mut stmt = conn.prepare(
                "SELECT id, owner_id, title, archived, context, pending_proposal, created_at, updated_at
                 FROM conversations WHERE id = ?1 AND owner_id = ?2",
            )?;
            let result = stmt
                .query_row(params![id, owner_id], |row| Ok(Self::row_to_conversation(row)))
                .optional()?;
            result.transpose()
        })
        .await?
    }

    pub async fn list_conversations(&self, owner_id: &str) -> Result<Vec<ConversationSummary>> {
        let conn = self.conn.clone();
        let owner_id = owner_id.to_string();
        task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let mut stmt = conn.prepare(
                "SELECT c.id, c.owner_id, c.title, c.archived, c.context, c.pending_proposal, c.created_at, c.updated_at,
                        (SELECT COUNT(*) FROM messages m WHERE m.conversation_id = c.id) AS message_count,
                        (SELECT SUBSTR(m.content, 1, ?2) FROM messages m WHERE m.conversation_id = c.id ORDER BY m.seq DESC LIMIT 1) AS last_preview
                 FROM conversations c WHERE c.owner_id = ?1 ORDER BY c.updated_at DESC",
            )?;
            let summaries = stmt
                .query_map(params![owner_id, PREVIEW_CHARS], |row| {
                    let message_count: i64 = row.get(8)?;
                    let last_message_preview: Option<String> = row.get(9)?;
                    Ok(Self::row_to_conversation(row).map(|conversation| ConversationSummary {
                        conversation,
                        message_count,
                        last_message_preview,
                    }))
                })?
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .collect::<Result<Vec<_>, _>>()?;
            Ok(summaries)
        })
        .await?
    }

    /// Sets the title only while it is still unset. Returns whether it was written.
    pub async fn set_title_if_unset(&self, id: &str, title: &str) -> Result<bool> {
        let conn = self.conn.clone();
        let id = id.to_string();
        let title = title.to_string();
        task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let changed = conn.execute(
                "UPDATE conversations SET title = ?1 WHERE id = ?2 AND title IS NULL",
                params![title, id],
            )?;
            Ok(changed == 1)
        })
        .await?
    }

    pub async fn archive_conversation(&self, owner_id: &str, id: &str) -> Result<bool> {
        let conn = self.conn.clone();
        let owner_id = owner_id.to_string();
        let id = id.to_string();
        task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let changed = conn.execute(
                "UPDATE conversations SET archived = 1, pending_proposal = NULL, updated_at = ?1
                 WHERE id = ?2 AND owner_id = ?3",
                params![Utc::now().to_rfc3339(), id, owner_id],
            )?;
            Ok(changed == 1)
        })
        .await?
    }

    /// Replace the conversation's proposal slot wholesale.
    pub async fn set_pending_proposal(
        &self,
        conversation_id: &str,
        proposal: Option<&PendingProposal>,
    ) -> Result<()> {
        let conn = self.conn.clone();
        let conversation_id = conversation_id.to_string();
        let json = proposal.map(serde_json::to_string).transpose()?;
        task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            conn.execute(
                "UPDATE conversations SET pending_proposal = ?1 WHERE id = ?2",
                params![json, conversation_id],
            )?;
            Ok(())
        })
        .await?
    }

    // --- Messages ---

    /// Append a message at the next sequence number and bump `updated_at`,
    /// in one transaction.
    pub async fn append_message(&self, conversation_id: &str, message: NewMessage) -> Result<Message> {
        let conn = self.conn.clone();
        let conversation_id = conversation_id.to_string();
        task::spawn_blocking(move || {
            let mut conn = lock(&conn)?;
            let tx = conn.transaction()?;
            let seq: i64 = tx.query_row(
                "SELECT COALESCE(MAX(seq), 0) + 1 FROM messages WHERE conversation_id = ?1",
                params![conversation_id],
                |row| row.get(0),
            )?;
            let now = Utc::now();
            let msg = Message {
                id: message.id,
                conversation_id: conversation_id.clone(),
                role: message.role,
                content: message.content,
                record_ids: message.record_ids,
                proposed_action: message.proposed_action,
                seq,
                metadata: message.metadata,
                created_at: now,
            };
            let proposed = msg
                .proposed_action
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            tx.execute(
                "INSERT INTO messages (id, conversation_id, seq, role, content, record_ids, proposed_action, model, tokens_in, tokens_out, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    msg.id,
                    msg.conversation_id,
                    msg.seq,
                    msg.role.as_str(),
                    msg.content,
                    serde_json::to_string(&msg.record_ids)?,
                    proposed,
                    msg.metadata.model,
                    msg.metadata.tokens_in,
                    msg.metadata.tokens_out,
                    serde_json::to_string(&msg.metadata)?,
                    now.to_rfc3339(),
                ],
            )?;
            tx.execute(
                "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
                params![now.to_rfc3339(), conversation_id],
            )?;
            tx.commit()?;
            Ok(msg)
        })
        .await?
    }

    pub async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let conn = self.conn.clone();
        let conversation_id = conversation_id.to_string();
        task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, seq, role, content, record_ids, proposed_action, metadata, created_at
                 FROM messages WHERE conversation_id = ?1 ORDER BY seq ASC",
            )?;
            let messages = stmt
                .query_map(params![conversation_id], |row| Ok(Self::row_to_message(row)))?
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .collect::<Result<Vec<_>, _>>()?;
            Ok(messages)
        })
        .await?
    }

    /// The last `limit` messages, oldest first.
    pub async fn recent_messages(&self, conversation_id: &str, limit: u32) -> Result<Vec<Message>> {
        let conn = self.conn.clone();
        let conversation_id = conversation_id.to_string();
        task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, seq, role, content, record_ids, proposed_action, metadata, created_at
                 FROM messages WHERE conversation_id = ?1 ORDER BY seq DESC LIMIT ?2",
            )?;
            let mut messages = stmt
                .query_map(params![conversation_id, limit], |row| Ok(Self::row_to_message(row)))?
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .collect::<Result<Vec<_>, _>>()?;
            messages.reverse();
            Ok(messages)
        })
        .await?
    }

    // --- Audit ---

    pub async fn insert_audit_entry(&self, entry: &ActionAuditEntry) -> Result<()> {
        let conn = self.conn.clone();
        let entry = entry.clone();
        task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            conn.execute(
                "INSERT INTO action_audit (id, conversation_id, message_id, action_type, record_id, record_ids, before_value, after_value, outcome, failure_reason, confirmed_by_user, unchanged, actor_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    entry.id,
                    entry.conversation_id,
                    entry.message_id,
                    entry.action_type.as_str(),
                    entry.record_ids.first(),
                    serde_json::to_string(&entry.record_ids)?,
                    entry.before_value,
                    entry.after_value,
                    entry.outcome.as_str(),
                    entry.failure_reason,
                    entry.confirmed_by_user as i32,
                    entry.unchanged as i32,
                    entry.actor_id,
                    entry.created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await?
    }

    pub async fn list_audit_for_record(
        &self,
        owner_id: &str,
        record_id: &str,
    ) -> Result<Vec<ActionAuditEntry>> {
        let conn = self.conn.clone();
        let owner_id = owner_id.to_string();
        let record_id = record_id.to_string();
        task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, message_id, action_type, record_ids, before_value, after_value, outcome, failure_reason, confirmed_by_user, unchanged, actor_id, created_at
                 FROM action_audit WHERE actor_id = ?1 AND record_id = ?2 ORDER BY created_at ASC",
            )?;
            let entries = stmt
                .query_map(params![owner_id, record_id], |row| Ok(Self::row_to_audit(row)))?
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .collect::<Result<Vec<_>, _>>()?;
            Ok(entries)
        })
        .await?
    }

    pub async fn list_audit_for_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<ActionAuditEntry>> {
        let conn = self.conn.clone();
        let conversation_id = conversation_id.to_string();
        task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, message_id, action_type, record_ids, before_value, after_value, outcome, failure_reason, confirmed_by_user, unchanged, actor_id, created_at
                 FROM action_audit WHERE conversation_id = ?1 ORDER BY created_at ASC",
            )?;
            let entries = stmt
                .query_map(params![conversation_id], |row| Ok(Self::row_to_audit(row)))?
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .collect::<Result<Vec<_>, _>>()?;
            Ok(entries)
        })
        .await?
    }

    // --- Invoices ---

    pub async fn upsert_invoice(&self, invoice: &Invoice) -> Result<()> {
        let conn = self.conn.clone();
        let invoice = invoice.clone();
        task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            Self::write_invoice(&conn, &invoice)
        })
        .await?
    }

    pub async fn count_invoices(&self, owner_id: &str) -> Result<i64> {
        let conn = self.conn.clone();
        let owner_id = owner_id.to_string();
        task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM invoices WHERE owner_id = ?1",
                params![owner_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
        .await?
    }

    pub async fn get_invoice(&self, owner_id: &str, id: &str) -> Result<Option<Invoice>> {
        let conn = self.conn.clone();
        let owner_id = owner_id.to_string();
        let id = id.to_string();
        task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            Self::read_invoice(&conn, &owner_id, &id)
        })
        .await?
    }

    pub async fn query_invoices(
        &self,
        owner_id: &str,
        filter: &RecordFilter,
        page: PageRequest,
    ) -> Result<RecordPage> {
        let conn = self.conn.clone();
        let owner_id = owner_id.to_string();
        let filter = filter.clone();
        task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let (where_sql, mut values) = Self::filter_clause(&owner_id, &filter);

            let count_sql = format!("SELECT COUNT(*) FROM invoices WHERE {}", where_sql);
            let total: i64 = conn.query_row(
                &count_sql,
                rusqlite::params_from_iter(values.iter().map(|v| v.as_ref())),
                |row| row.get(0),
            )?;

            let select_sql = format!(
                "SELECT id, owner_id, vendor, amount_cents, status, issue_date, due_date, notes, updated_at
                 FROM invoices WHERE {} ORDER BY issue_date DESC, id ASC LIMIT ? OFFSET ?",
                where_sql
            );
            values.push(Box::new(page.limit as i64));
            values.push(Box::new(page.offset as i64));
            let mut stmt = conn.prepare(&select_sql)?;
            let records = stmt
                .query_map(
                    rusqlite::params_from_iter(values.iter().map(|v| v.as_ref())),
                    |row| Ok(Self::row_to_invoice(row)),
                )?
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .collect::<Result<Vec<_>, _>>()?;

            Ok(RecordPage {
                records,
                total: total as u64,
            })
        })
        .await?
    }

    /// Apply a patch inside a transaction. `Ok(None)` when the invoice does not exist.
    pub async fn patch_invoice(
        &self,
        owner_id: &str,
        id: &str,
        patch: &RecordPatch,
    ) -> Result<Option<Invoice>> {
        let conn = self.conn.clone();
        let owner_id = owner_id.to_string();
        let id = id.to_string();
        let patch = patch.clone();
        task::spawn_blocking(move || {
            let mut conn = lock(&conn)?;
            let tx = conn.transaction()?;
            let Some(mut invoice) = Self::read_invoice(&tx, &owner_id, &id)? else {
                return Ok(None);
            };
            match patch {
                RecordPatch::SetStatus { status } => invoice.status = status,
                RecordPatch::AppendNote { note } => invoice.notes.push(note),
            }
            invoice.updated_at = Utc::now();
            Self::write_invoice(&tx, &invoice)?;
            tx.commit()?;
            Ok(Some(invoice))
        })
        .await?
    }

    // --- Settings ---

    pub async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.clone();
        let key = key.to_string();
        task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let result: Option<String> = conn
                .query_row(
                    "SELECT value FROM settings WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(result)
        })
        .await?
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.clone();
        let key = key.to_string();
        let value = value.to_string();
        task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            conn.execute(
                "INSERT INTO settings (key, value) VALUES (?1, ?2) ON CONFLICT(key) DO UPDATE SET value = ?2",
                params![key, value],
            )?;
            Ok(())
        })
        .await?
    }

    // --- Invoice helpers ---

    fn read_invoice(conn: &Connection, owner_id: &str, id: &str) -> Result<Option<Invoice>> {
        let mut stmt = conn.prepare(
            "SELECT id, owner_id, vendor, amount_cents, status, issue_date, due_date, notes, updated_at
             FROM invoices WHERE owner_id = ?1 AND id = ?2",
        )?;
        let result = stmt
            .query_row(params![owner_id, id], |row| Ok(Self::row_to_invoice(row)))
            .optional()?;
        result.transpose()
    }

    fn write_invoice(conn: &Connection, invoice: &Invoice) -> Result<()> {
        conn.execute(
            "INSERT INTO invoices (id, owner_id, vendor, amount_cents, status, issue_date, due_date, notes, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(owner_id, id) DO UPDATE SET
                vendor = excluded.vendor,
                amount_cents = excluded.amount_cents,
                status = excluded.status,
                issue_date = excluded.issue_date,
                due_date = excluded.due_date,
                notes = excluded.notes,
                updated_at = excluded.updated_at",
            params![
                invoice.id,
                invoice.owner_id,
                invoice.vendor,
                invoice.amount_cents,
                invoice.status.as_str(),
                invoice.issue_date.to_string(),
                invoice.due_date.to_string(),
                serde_json::to_string(&invoice.notes)?,
                invoice.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn filter_clause(owner_id: &str, filter: &RecordFilter) -> (String, Vec<Box<dyn ToSql>>) {
        let mut clauses = vec!["owner_id = ?".to_string()];
        let mut values: Vec<Box<dyn ToSql>> = vec![Box::new(owner_id.to_string())];

        if !filter.statuses.is_empty() {
            let marks = vec!["?"; filter.statuses.len()].join(", ");
            clauses.push(format!("status IN ({})", marks));
            for status in &filter.statuses {
                values.push(Box::new(status.as_str()));
            }
        }
        if !filter.vendors.is_empty() {
            let likes = vec!["LOWER(vendor) LIKE ? ESCAPE '\\'"; filter.vendors.len()].join(" OR ");
            clauses.push(format!("({})", likes));
            for vendor in &filter.vendors {
                values.push(Box::new(format!("%{}%", escape_like(&vendor.to_lowercase()))));
            }
        }
        if let Some(min) = filter.amount_min_cents() {
            clauses.push("amount_cents >= ?".to_string());
            values.push(Box::new(min));
        }
        if let Some(max) = filter.amount_max_cents() {
            clauses.push("amount_cents <= ?".to_string());
            values.push(Box::new(max));
        }
        if let Some(from) = filter.date_from {
            clauses.push("issue_date >= ?".to_string());
            values.push(Box::new(from.to_string()));
        }
        if let Some(to) = filter.date_to {
            clauses.push("issue_date <= ?".to_string());
            values.push(Box::new(to.to_string()));
        }

        (clauses.join(" AND "), values)
    }

    // --- Row helpers ---

    fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
        Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
    }

    fn row_to_conversation(row: &rusqlite::Row) -> Result<Conversation> {
        let archived_int: i32 = row.get(3)?;
        let context_str: String = row.get(4)?;
        let pending_str: Option<String> = row.get(5)?;
        let created_str: String = row.get(6)?;
        let updated_str: String = row.get(7)?;

        Ok(Conversation {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            title: row.get(2)?,
            archived: archived_int != 0,
            context: serde_json::from_str(&context_str)?,
            pending_proposal: pending_str
                .map(|s| serde_json::from_str(&s))
                .transpose()
                .context("Corrupt pending proposal")?,
            created_at: Self::parse_timestamp(&created_str)?,
            updated_at: Self::parse_timestamp(&updated_str)?,
        })
    }

    fn row_to_message(row: &rusqlite::Row) -> Result<Message> {
        let role_str: String = row.get(3)?;
        let record_ids_str: String = row.get(5)?;
        let proposed_str: Option<String> = row.get(6)?;
        let metadata_str: String = row.get(7)?;
        let created_str: String = row.get(8)?;

        let metadata: MessageMetadata = serde_json::from_str(&metadata_str).unwrap_or_default();

        Ok(Message {
            id: row.get(0)?,
            conversation_id: row.get(1)?,
            seq: row.get(2)?,
            role: Role::from_str(&role_str)
                .ok_or_else(|| anyhow!("Unknown role: {}", role_str))?,
            content: row.get(4)?,
            record_ids: serde_json::from_str(&record_ids_str)?,
            proposed_action: proposed_str
                .map(|s| serde_json::from_str(&s))
                .transpose()?,
            metadata,
            created_at: Self::parse_timestamp(&created_str)?,
        })
    }

    fn row_to_audit(row: &rusqlite::Row) -> Result<ActionAuditEntry> {
        let action_str: String = row.get(3)?;
        let record_ids_str: String = row.get(4)?;
        let outcome_str: String = row.get(7)?;
        let confirmed_int: i32 = row.get(9)?;
        let unchanged_int: i32 = row.get(10)?;
        let created_str: String = row.get(12)?;

        Ok(ActionAuditEntry {
            id: row.get(0)?,
            conversation_id: row.get(1)?,
            message_id: row.get(2)?,
            action_type: ActionType::from_str(&action_str)
                .ok_or_else(|| anyhow!("Unknown action type: {}", action_str))?,
            record_ids: serde_json::from_str(&record_ids_str)?,
            before_value: row.get(5)?,
            after_value: row.get(6)?,
            outcome: Outcome::from_str(&outcome_str)
                .ok_or_else(|| anyhow!("Unknown outcome: {}", outcome_str))?,
            failure_reason: row.get(8)?,
            confirmed_by_user: confirmed_int != 0,
            unchanged: unchanged_int != 0,
            actor_id: row.get(11)?,
            created_at: Self::parse_timestamp(&created_str)?,
        })
    }

    fn row_to_invoice(row: &rusqlite::Row) -> Result<Invoice> {
        let status_str: String = row.get(4)?;
        let issue_str: String = row.get(5)?;
        let due_str: String = row.get(6)?;
        let notes_str: String = row.get(7)?;
        let updated_str: String = row.get(8)?;

        Ok(Invoice {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            vendor: row.get(2)?,
            amount_cents: row.get(3)?,
            status: InvoiceStatus::from_str(&status_str)
                .ok_or_else(|| anyhow!("Unknown status: {}", status_str))?,
            issue_date: NaiveDate::parse_from_str(&issue_str, "%Y-%m-%d")?,
            due_date: NaiveDate::parse_from_str(&due_str, "%Y-%m-%d")?,
            notes: serde_json::from_str(&notes_str)?,
            updated_at: Self::parse_timestamp(&updated_str)?,
        })
    }
}

#[async_trait]
impl RecordStore for Database {
    async fn read(&self, owner_id: &str, id: &str) -> Result<Option<Invoice>, StoreError> {
        self.get_invoice(owner_id, id)
            .await
            .map_err(|e| StoreError::Unavailable(format!("{:#}", e)))
    }

    async fn query(
        &self,
        owner_id: &str,
        filter: &RecordFilter,
        page: PageRequest,
    ) -> Result<RecordPage, StoreError> {
        self.query_invoices(owner_id, filter, page)
            .await
            .map_err(|e| StoreError::Unavailable(format!("{:#}", e)))
    }

    async fn write(
        &self,
        owner_id: &str,
        id: &str,
        patch: &RecordPatch,
    ) -> Result<Invoice, StoreError> {
        self.patch_invoice(owner_id, id, patch)
            .await
            .map_err(|e| StoreError::Unavailable(format!("{:#}", e)))?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}

/// Escapes LIKE wildcards so vendor text matches literally.
fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn invoice(owner: &str, id: &str, vendor: &str, cents: i64, status: InvoiceStatus, issued: &str) -> Invoice {
        let issue_date = NaiveDate::parse_from_str(issued, "%Y-%m-%d").unwrap();
        Invoice {
            id: id.to_string(),
            owner_id: owner.to_string(),
            vendor: vendor.to_string(),
            amount_cents: cents,
            status,
            issue_date,
            due_date: issue_date + chrono::Duration::days(30),
            notes: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Runs raw SQL against the connection, e.g. to install a failing trigger.
    pub(crate) fn execute_sql(db: &Database, sql: &str) {
        lock(&db.conn).unwrap().execute_batch(sql).unwrap();
    }

    fn conversation(owner: &str) -> Conversation {
        let now = Utc::now();
        Conversation {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner.to_string(),
            title: None,
            archived: false,
            context: serde_json::json!({}),
            pending_proposal: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_schema_initialization() {
        let db = Database::new_in_memory().unwrap();
        assert!(db.list_conversations("alice").await.unwrap().is_empty());
        assert_eq!(db.count_invoices("alice").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_messages_get_increasing_seq_and_summary() {
        let db = Database::new_in_memory().unwrap();
        let conv = conversation("alice");
        db.insert_conversation(&conv).await.unwrap();

        for text in ["first", "second", "third"] {
            db.append_message(&conv.id, NewMessage::new(Role::User, text))
                .await
                .unwrap();
        }

        let messages = db.list_messages(&conv.id).await.unwrap();
        let seqs: Vec<i64> = messages.iter().map(|m| m.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);

        let recent = db.recent_messages(&conv.id, 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "second");
        assert_eq!(recent[1].content, "third");

        let summaries = db.list_conversations("alice").await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].message_count, 3);
        assert_eq!(summaries[0].last_message_preview.as_deref(), Some("third"));
    }

    #[tokio::test]
    async fn test_conversations_are_scoped_to_owner() {
        let db = Database::new_in_memory().unwrap();
        let conv = conversation("alice");
        db.insert_conversation(&conv).await.unwrap();

        assert!(db.get_conversation("bob", &conv.id).await.unwrap().is_none());
        assert!(db.list_conversations("bob").await.unwrap().is_empty());
        assert!(!db.archive_conversation("bob", &conv.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_title_is_written_once() {
        let db = Database::new_in_memory().unwrap();
        let conv = conversation("alice");
        db.insert_conversation(&conv).await.unwrap();

        assert!(db.set_title_if_unset(&conv.id, "First").await.unwrap());
        assert!(!db.set_title_if_unset(&conv.id, "Second").await.unwrap());
        let stored = db.get_conversation("alice", &conv.id).await.unwrap().unwrap();
        assert_eq!(stored.title.as_deref(), Some("First"));
    }

    #[tokio::test]
    async fn test_invoice_filtering_and_owner_scope() {
        let db = Database::new_in_memory().unwrap();
        db.upsert_invoice(&invoice("alice", "INV-1", "Acme Corp", 60_000, InvoiceStatus::Pending, "2026-09-03"))
            .await
            .unwrap();
        db.upsert_invoice(&invoice("alice", "INV-2", "Globex", 20_000, InvoiceStatus::Pending, "2026-09-10"))
            .await
            .unwrap();
        db.upsert_invoice(&invoice("alice", "INV-3", "Acme Corp", 90_000, InvoiceStatus::Paid, "2026-10-01"))
            .await
            .unwrap();
        db.upsert_invoice(&invoice("bob", "INV-4", "Acme Corp", 99_000, InvoiceStatus::Pending, "2026-09-05"))
            .await
            .unwrap();

        let filter = RecordFilter {
            vendors: vec!["acme".to_string()],
            amount_min: Some(500.0),
            date_from: NaiveDate::from_ymd_opt(2026, 9, 1),
            date_to: NaiveDate::from_ymd_opt(2026, 9, 30),
            ..Default::default()
        };
        let page = db
            .query_invoices("alice", &filter, PageRequest { offset: 0, limit: 10 })
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.records[0].id, "INV-1");

        let pending = RecordFilter {
            statuses: vec![InvoiceStatus::Pending],
            ..Default::default()
        };
        let page = db
            .query_invoices("alice", &pending, PageRequest { offset: 0, limit: 1 })
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.records.len(), 1);

        assert!(db.get_invoice("bob", "INV-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_vendor_wildcards_match_literally() {
        let db = Database::new_in_memory().unwrap();
        db.upsert_invoice(&invoice("alice", "INV-1", "100% Paper", 1_000, InvoiceStatus::Pending, "2026-09-03"))
            .await
            .unwrap();
        db.upsert_invoice(&invoice("alice", "INV-2", "1000 Widgets", 2_000, InvoiceStatus::Pending, "2026-09-04"))
            .await
            .unwrap();
        db.upsert_invoice(&invoice("alice", "INV-3", "Acme_Labs", 3_000, InvoiceStatus::Pending, "2026-09-05"))
            .await
            .unwrap();
        db.upsert_invoice(&invoice("alice", "INV-4", "AcmeXLabs", 4_000, InvoiceStatus::Pending, "2026-09-06"))
            .await
            .unwrap();

        let ids = |vendor: &str| RecordFilter {
            vendors: vec![vendor.to_string()],
            ..Default::default()
        };
        let page = db
            .query_invoices("alice", &ids("100%"), PageRequest { offset: 0, limit: 10 })
            .await
            .unwrap();
        assert_eq!(page.records.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), vec!["INV-1"]);

        let page = db
            .query_invoices("alice", &ids("acme_"), PageRequest { offset: 0, limit: 10 })
            .await
            .unwrap();
        assert_eq!(page.records.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), vec!["INV-3"]);
    }

    #[tokio::test]
    async fn test_patch_invoice() {
        let db = Database::new_in_memory().unwrap();
        db.upsert_invoice(&invoice("alice", "INV-1", "Acme", 1_000, InvoiceStatus::Approved, "2026-09-03"))
            .await
            .unwrap();

        let patched = db
            .patch_invoice("alice", "INV-1", &RecordPatch::SetStatus { status: InvoiceStatus::Paid })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(patched.status, InvoiceStatus::Paid);

        let noted = db
            .patch_invoice("alice", "INV-1", &RecordPatch::AppendNote { note: "wired".to_string() })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(noted.notes, vec!["wired".to_string()]);

        let missing = RecordStore::write(
            &db,
            "bob",
            "INV-1",
            &RecordPatch::SetStatus { status: InvoiceStatus::Paid },
        )
        .await;
        assert!(matches!(missing, Err(StoreError::NotFound(_))));
    }
}
