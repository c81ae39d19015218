//! SQLite 持久化实现
//!
//! 单连接 + 粗粒度互斥锁：控制循环本身是单线程顺序执行的，锁只作为将来并行化阶段时的保险。
//! 时间戳统一存为定宽 RFC3339（微秒、`Z` 结尾），字符串比较即时间比较。

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{
    AcceptedConnection, ActionKind, ActivityEvent, FollowUpMessage, MessageStatus, NewEvent,
    OutreachRequest, OutreachStore, Outcome, RequestStatus, Target, TargetDraft,
};
use crate::core::error::StoreError;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS targets (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        url TEXT UNIQUE NOT NULL,
        name TEXT NOT NULL DEFAULT '',
        role TEXT NOT NULL DEFAULT '',
        organization TEXT NOT NULL DEFAULT '',
        location TEXT NOT NULL DEFAULT '',
        keywords TEXT NOT NULL DEFAULT '',
        discovered_at TEXT NOT NULL
    );

    -- 每个目标至多一条请求
    CREATE TABLE IF NOT EXISTS outreach_requests (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        target_id INTEGER NOT NULL UNIQUE,
        target_url TEXT NOT NULL,
        created_at TEXT NOT NULL,
        note TEXT,
        status TEXT NOT NULL DEFAULT 'pending',
        accepted_at TEXT,
        FOREIGN KEY (target_id) REFERENCES targets(id)
    );

    CREATE TABLE IF NOT EXISTS follow_up_messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        target_id INTEGER NOT NULL,
        target_url TEXT NOT NULL,
        content TEXT NOT NULL,
        sent_at TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'sent',
        FOREIGN KEY (target_id) REFERENCES targets(id)
    );

    -- 只追加的审计日志，配额计数的唯一来源
    CREATE TABLE IF NOT EXISTS activity_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        kind TEXT NOT NULL,
        target_url TEXT,
        outcome TEXT NOT NULL,
        detail TEXT NOT NULL DEFAULT '',
        created_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_requests_status ON outreach_requests(status);
    CREATE INDEX IF NOT EXISTS idx_messages_target ON follow_up_messages(target_id);
    CREATE INDEX IF NOT EXISTS idx_events_kind_time ON activity_events(kind, outcome, created_at);
";

const TARGET_COLUMNS: &str =
    "id, url, name, role, organization, location, keywords, discovered_at";
const REQUEST_COLUMNS: &str =
    "id, target_id, target_url, created_at, note, status, accepted_at";

fn format_ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp `{raw}`: {e}")))
}

/// 行原始值：先按列读出字符串，再统一解析时间戳与枚举
struct RawTarget {
    id: i64,
    url: String,
    name: String,
    role: String,
    organization: String,
    location: String,
    keywords: String,
    discovered_at: String,
}

impl RawTarget {
    fn read(row: &Row<'_>, offset: usize) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(offset)?,
            url: row.get(offset + 1)?,
            name: row.get(offset + 2)?,
            role: row.get(offset + 3)?,
            organization: row.get(offset + 4)?,
            location: row.get(offset + 5)?,
            keywords: row.get(offset + 6)?,
            discovered_at: row.get(offset + 7)?,
        })
    }

    fn into_target(self) -> Result<Target, StoreError> {
        Ok(Target {
            id: self.id,
            url: self.url,
            name: self.name,
            role: self.role,
            organization: self.organization,
            location: self.location,
            keywords: self.keywords,
            discovered_at: parse_ts(&self.discovered_at)?,
        })
    }
}

struct RawRequest {
    id: i64,
    target_id: i64,
    target_url: String,
    created_at: String,
    note: Option<String>,
    status: String,
    accepted_at: Option<String>,
}

impl RawRequest {
    fn read(row: &Row<'_>, offset: usize) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(offset)?,
            target_id: row.get(offset + 1)?,
            target_url: row.get(offset + 2)?,
            created_at: row.get(offset + 3)?,
            note: row.get(offset + 4)?,
            status: row.get(offset + 5)?,
            accepted_at: row.get(offset + 6)?,
        })
    }

    fn into_request(self) -> Result<OutreachRequest, StoreError> {
        Ok(OutreachRequest {
            id: self.id,
            target_id: self.target_id,
            target_url: self.target_url,
            created_at: parse_ts(&self.created_at)?,
            note: self.note,
            status: self.status.parse()?,
            accepted_at: self.accepted_at.as_deref().map(parse_ts).transpose()?,
        })
    }
}

struct RawEvent {
    id: i64,
    kind: String,
    target_url: Option<String>,
    outcome: String,
    detail: String,
    created_at: String,
}

impl RawEvent {
    fn into_event(self) -> Result<ActivityEvent, StoreError> {
        Ok(ActivityEvent {
            id: self.id,
            kind: self.kind.parse()?,
            target_url: self.target_url,
            outcome: self.outcome.parse()?,
            detail: self.detail,
            at: parse_ts(&self.created_at)?,
        })
    }
}

fn insert_event(conn: &Connection, event: &NewEvent) -> Result<ActivityEvent, StoreError> {
    conn.execute(
        "INSERT INTO activity_events (kind, target_url, outcome, detail, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            event.kind.as_str(),
            event.target_url,
            event.outcome.as_str(),
            event.detail,
            format_ts(event.at),
        ],
    )?;
    Ok(ActivityEvent {
        id: conn.last_insert_rowid(),
        kind: event.kind,
        target_url: event.target_url.clone(),
        outcome: event.outcome,
        detail: event.detail.clone(),
        at: event.at,
    })
}

/// 基于 SQLite 的外联存储
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// 打开或创建数据库；父目录不存在时自动创建
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// 内存数据库（测试与 dry-run）
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn select_target(conn: &Connection, url: &str) -> Result<Option<Target>, StoreError> {
        let raw = conn
            .query_row(
                &format!("SELECT {TARGET_COLUMNS} FROM targets WHERE url = ?1"),
                params![url],
                |row| RawTarget::read(row, 0),
            )
            .optional()?;
        raw.map(RawTarget::into_target).transpose()
    }

    fn select_request(conn: &Connection, url: &str) -> Result<Option<OutreachRequest>, StoreError> {
        let raw = conn
            .query_row(
                &format!("SELECT {REQUEST_COLUMNS} FROM outreach_requests WHERE target_url = ?1"),
                params![url],
                |row| RawRequest::read(row, 0),
            )
            .optional()?;
        raw.map(RawRequest::into_request).transpose()
    }
}

impl OutreachStore for SqliteStore {
    fn upsert_target(&self, draft: &TargetDraft, at: DateTime<Utc>) -> Result<Target, StoreError> {
        let conn = self.lock()?;
        // 空属性不覆盖已有值
        conn.execute(
            "INSERT INTO targets (url, name, role, organization, location, keywords, discovered_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(url) DO UPDATE SET
                name = CASE WHEN excluded.name <> '' THEN excluded.name ELSE targets.name END,
                role = CASE WHEN excluded.role <> '' THEN excluded.role ELSE targets.role END,
                organization = CASE WHEN excluded.organization <> '' THEN excluded.organization ELSE targets.organization END,
                location = CASE WHEN excluded.location <> '' THEN excluded.location ELSE targets.location END,
                keywords = CASE WHEN excluded.keywords <> '' THEN excluded.keywords ELSE targets.keywords END",
            params![
                draft.url,
                draft.name,
                draft.role,
                draft.organization,
                draft.location,
                draft.keywords,
                format_ts(at),
            ],
        )?;
        Self::select_target(&conn, &draft.url)?
            .ok_or_else(|| StoreError::Corrupt(format!("target vanished after upsert: {}", draft.url)))
    }

    fn target_by_url(&self, url: &str) -> Result<Option<Target>, StoreError> {
        let conn = self.lock()?;
        Self::select_target(&conn, url)
    }

    fn targets_awaiting_request(&self, limit: usize) -> Result<Vec<Target>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TARGET_COLUMNS} FROM targets t
             WHERE NOT EXISTS (SELECT 1 FROM outreach_requests r WHERE r.target_id = t.id)
             ORDER BY t.discovered_at ASC, t.id ASC
             LIMIT ?1"
        ))?;
        let raws = stmt
            .query_map(params![limit as i64], |row| RawTarget::read(row, 0))?
            .collect::<Result<Vec<_>, _>>()?;
        raws.into_iter().map(RawTarget::into_target).collect()
    }

    fn request_for(&self, target_url: &str) -> Result<Option<OutreachRequest>, StoreError> {
        let conn = self.lock()?;
        Self::select_request(&conn, target_url)
    }

    fn record_request(
        &self,
        target: &Target,
        note: Option<&str>,
        event: &NewEvent,
    ) -> Result<OutreachRequest, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO outreach_requests (target_id, target_url, created_at, note, status)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                target.id,
                target.url,
                format_ts(event.at),
                note,
                RequestStatus::Pending.as_str(),
            ],
        )?;
        let id = tx.last_insert_rowid();
        insert_event(&tx, event)?;
        tx.commit()?;
        Ok(OutreachRequest {
            id,
            target_id: target.id,
            target_url: target.url.clone(),
            created_at: event.at,
            note: note.map(str::to_string),
            status: RequestStatus::Pending,
            accepted_at: None,
        })
    }

    fn update_request_status(
        &self,
        target_url: &str,
        status: RequestStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let accepted_at = (status == RequestStatus::Accepted).then(|| format_ts(at));
        let changed = conn.execute(
            "UPDATE outreach_requests SET status = ?1, accepted_at = ?2 WHERE target_url = ?3",
            params![status.as_str(), accepted_at, target_url],
        )?;
        Ok(changed > 0)
    }

    fn accepted_unmessaged(&self) -> Result<Vec<AcceptedConnection>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT r.id, r.target_id, r.target_url, r.created_at, r.note, r.status, r.accepted_at,
                    t.id, t.url, t.name, t.role, t.organization, t.location, t.keywords, t.discovered_at
             FROM outreach_requests r
             JOIN targets t ON t.id = r.target_id
             WHERE r.status = 'accepted'
               AND NOT EXISTS (SELECT 1 FROM follow_up_messages m WHERE m.target_id = r.target_id)
             ORDER BY r.accepted_at ASC, r.id ASC",
        )?;
        let raws = stmt
            .query_map([], |row| Ok((RawRequest::read(row, 0)?, RawTarget::read(row, 7)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        raws.into_iter()
            .map(|(request, target)| -> Result<AcceptedConnection, StoreError> {
                Ok(AcceptedConnection {
                    request: request.into_request()?,
                    target: target.into_target()?,
                })
            })
            .collect()
    }

    fn messages_for(&self, target_url: &str) -> Result<Vec<FollowUpMessage>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, target_id, target_url, content, sent_at, status
             FROM follow_up_messages WHERE target_url = ?1 ORDER BY id ASC",
        )?;
        let raws = stmt
            .query_map(params![target_url], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        raws.into_iter()
            .map(|(id, target_id, target_url, content, sent_at, status)| -> Result<FollowUpMessage, StoreError> {
                Ok(FollowUpMessage {
                    id,
                    target_id,
                    target_url,
                    content,
                    sent_at: parse_ts(&sent_at)?,
                    status: status.parse()?,
                })
            })
            .collect()
    }

    fn record_message(
        &self,
        target: &Target,
        content: &str,
        status: MessageStatus,
        event: &NewEvent,
    ) -> Result<FollowUpMessage, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO follow_up_messages (target_id, target_url, content, sent_at, status)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![target.id, target.url, content, format_ts(event.at), status.as_str()],
        )?;
        let id = tx.last_insert_rowid();
        insert_event(&tx, event)?;
        tx.commit()?;
        Ok(FollowUpMessage {
            id,
            target_id: target.id,
            target_url: target.url.clone(),
            content: content.to_string(),
            sent_at: event.at,
            status,
        })
    }

    fn log_event(&self, event: &NewEvent) -> Result<ActivityEvent, StoreError> {
        let conn = self.lock()?;
        insert_event(&conn, event)
    }

    fn count_events(
        &self,
        kind: ActionKind,
        outcome: Outcome,
        since: DateTime<Utc>,
    ) -> Result<u32, StoreError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM activity_events
             WHERE kind = ?1 AND outcome = ?2 AND created_at >= ?3",
            params![kind.as_str(), outcome.as_str(), format_ts(since)],
            |row| row.get(0),
        )?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    fn recent_events(&self, limit: usize) -> Result<Vec<ActivityEvent>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, kind, target_url, outcome, detail, created_at
             FROM activity_events ORDER BY id DESC LIMIT ?1",
        )?;
        let raws = stmt
            .query_map(params![limit as i64], |row| {
                Ok(RawEvent {
                    id: row.get(0)?,
                    kind: row.get(1)?,
                    target_url: row.get(2)?,
                    outcome: row.get(3)?,
                    detail: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        raws.into_iter().map(RawEvent::into_event).collect()
    }
}
