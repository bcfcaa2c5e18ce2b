use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use crate::errors::TodoError;
use crate::model::{
    ChatMessage, ChatRole, CheckIn, CheckInSummary, DueCheckIn, Item, SubItem, TodoList,
    UserProfile,
};

const DEADLINE_FORMAT: &str = "%Y-%m-%d";

pub struct TodoDatabase {
    conn: Mutex<Connection>,
}

impl TodoDatabase {
    /// Helper to lock the connection
    pub(crate) fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow!("Database lock poisoned: {}", e))
    }

    /// Create or open the database
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.ensure_schema()?;
        Ok(db)
    }

    /// Create the database schema
    fn ensure_schema(&self) -> Result<()> {
        let conn = self.lock_conn()?;

        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                first_name TEXT NOT NULL,
                last_name TEXT NOT NULL DEFAULT '',
                phone_number TEXT NOT NULL,
                created_at TEXT NOT NULL
            )"#,
            [],
        )?;

        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS todo_lists (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                is_completed INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )"#,
            [],
        )?;

        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS items (
                id TEXT PRIMARY KEY,
                list_id TEXT NOT NULL REFERENCES todo_lists(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                notes TEXT,
                deadline TEXT,
                is_completed INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            )"#,
            [],
        )?;

        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS sub_items (
                id TEXT PRIMARY KEY,
                item_id TEXT NOT NULL REFERENCES items(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                is_completed INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            )"#,
            [],
        )?;

        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS chat_messages (
                id TEXT PRIMARY KEY,
                list_id TEXT NOT NULL REFERENCES todo_lists(id) ON DELETE CASCADE,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            )"#,
            [],
        )?;

        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS check_ins (
                id TEXT PRIMARY KEY,
                item_id TEXT NOT NULL REFERENCES items(id) ON DELETE CASCADE,
                user_id TEXT NOT NULL,
                scheduled_at TEXT NOT NULL,
                notes TEXT,
                created_at TEXT NOT NULL
            )"#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_todo_lists_user ON todo_lists(user_id)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_items_list ON items(list_id)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_sub_items_item ON sub_items(item_id)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_chat_messages_list ON chat_messages(list_id)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_check_ins_scheduled_at ON check_ins(scheduled_at)",
            [],
        )?;

        Ok(())
    }

    // ========================================================================
    // Users
    // ========================================================================

    pub fn upsert_user(&self, profile: &UserProfile) -> Result<(), TodoError> {
        if profile.id.trim().is_empty() {
            return Err(TodoError::validation("id", "must not be blank"));
        }
        if profile.first_name.trim().is_empty() {
            return Err(TodoError::validation("first_name", "must not be blank"));
        }
        if profile.phone_number.trim().is_empty() {
            return Err(TodoError::validation("phone_number", "must not be blank"));
        }

        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO users (id, first_name, last_name, phone_number, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
               first_name = excluded.first_name,
               last_name = excluded.last_name,
               phone_number = excluded.phone_number",
            params![
                profile.id,
                profile.first_name.trim(),
                profile.last_name.trim(),
                profile.phone_number.trim(),
                format_timestamp(Utc::now()),
            ],
        )?;
        Ok(())
    }

    pub fn get_user(&self, user_id: &str) -> Result<Option<UserProfile>, TodoError> {
        let conn = self.lock_conn()?;
        let user = conn
            .query_row(
                "SELECT id, first_name, last_name, phone_number FROM users WHERE id = ?1",
                [user_id],
                |row| {
                    Ok(UserProfile {
                        id: row.get(0)?,
                        first_name: row.get(1)?,
                        last_name: row.get(2)?,
                        phone_number: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(user)
    }

    // ========================================================================
    // Lists
    // ========================================================================

    pub fn create_list(&self, user_id: &str, name: &str) -> Result<TodoList, TodoError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(TodoError::validation("name", "must not be blank"));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let now = format_timestamp(Utc::now());
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO todo_lists (id, user_id, name, is_completed, created_at, updated_at)
             VALUES (?1, ?2, ?3, 0, ?4, ?4)",
            params![id, user_id, name, now],
        )?;

        load_list(&conn, user_id, &id)?
            .ok_or_else(|| TodoError::Storage(anyhow!("created list '{}' vanished", id)))
    }

    /// All of a user's lists in creation order, fully populated.
    pub fn list_lists(&self, user_id: &str) -> Result<Vec<TodoList>, TodoError> {
        let conn = self.lock_conn()?;
        let ids = {
            let mut stmt = conn.prepare(
                "SELECT id FROM todo_lists WHERE user_id = ?1 ORDER BY created_at ASC, rowid ASC",
            )?;
            let ids = stmt
                .query_map([user_id], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            ids
        };

        let mut lists = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(list) = load_list(&conn, user_id, &id)? {
                lists.push(list);
            }
        }
        Ok(lists)
    }

    pub fn get_list(&self, user_id: &str, list_id: &str) -> Result<Option<TodoList>, TodoError> {
        let conn = self.lock_conn()?;
        load_list(&conn, user_id, list_id)
    }

    /// Delete a list; items, sub-items, messages and check-ins cascade.
    pub fn delete_list(&self, user_id: &str, list_id: &str) -> Result<(), TodoError> {
        let conn = self.lock_conn()?;
        let deleted = conn.execute(
            "DELETE FROM todo_lists WHERE id = ?1 AND user_id = ?2",
            params![list_id, user_id],
        )?;
        if deleted == 0 {
            return Err(TodoError::NotFound(format!("list '{}'", list_id)));
        }
        tracing::info!("Deleted list {} for user {}", list_id, user_id);
        Ok(())
    }

    // ========================================================================
    // Chat
    // ========================================================================

    /// Append a chat turn to a list the user owns.
    pub fn add_chat_message(
        &self,
        user_id: &str,
        list_id: &str,
        role: ChatRole,
        content: &str,
    ) -> Result<ChatMessage, TodoError> {
        let conn = self.lock_conn()?;
        ensure_list_owner(&conn, user_id, list_id)?;

        let message = ChatMessage {
            id: uuid::Uuid::new_v4().to_string(),
            list_id: list_id.to_string(),
            role,
            content: content.to_string(),
            created_at: Utc::now(),
        };
        conn.execute(
            "INSERT INTO chat_messages (id, list_id, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                message.id,
                message.list_id,
                message.role.as_str(),
                message.content,
                format_timestamp(message.created_at),
            ],
        )?;
        Ok(message)
    }

    pub fn chat_history(&self, user_id: &str, list_id: &str) -> Result<Vec<ChatMessage>, TodoError> {
        let conn = self.lock_conn()?;
        ensure_list_owner(&conn, user_id, list_id)?;
        Ok(load_messages(&conn, list_id)?)
    }

    // ========================================================================
    // Check-ins
    // ========================================================================

    /// Schedule a phone check-in for an item under one of the user's lists.
    pub fn schedule_check_in(
        &self,
        user_id: &str,
        item_id: &str,
        scheduled_at: DateTime<Utc>,
        notes: Option<&str>,
    ) -> Result<CheckIn, TodoError> {
        let conn = self.lock_conn()?;
        let owned: Option<String> = conn
            .query_row(
                "SELECT i.id FROM items i
                 JOIN todo_lists l ON l.id = i.list_id
                 WHERE i.id = ?1 AND l.user_id = ?2",
                params![item_id, user_id],
                |row| row.get(0),
            )
            .optional()?;
        if owned.is_none() {
            return Err(TodoError::NotFound(format!("item '{}'", item_id)));
        }

        let check_in = CheckIn {
            id: uuid::Uuid::new_v4().to_string(),
            item_id: item_id.to_string(),
            user_id: user_id.to_string(),
            scheduled_at,
            notes: notes
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string),
            created_at: Utc::now(),
        };
        conn.execute(
            "INSERT INTO check_ins (id, item_id, user_id, scheduled_at, notes, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                check_in.id,
                check_in.item_id,
                check_in.user_id,
                format_timestamp(check_in.scheduled_at),
                check_in.notes,
                format_timestamp(check_in.created_at),
            ],
        )?;
        tracing::info!(
            "Scheduled check-in {} for item {} at {}",
            check_in.id,
            item_id,
            scheduled_at
        );
        Ok(check_in)
    }

    /// Future check-ins for a user, soonest first.
    pub fn upcoming_check_ins(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<CheckInSummary>, TodoError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT c.id, c.item_id, i.name, l.name, c.scheduled_at, c.notes
             FROM check_ins c
             JOIN items i ON i.id = c.item_id
             JOIN todo_lists l ON l.id = i.list_id
             WHERE c.user_id = ?1 AND c.scheduled_at >= ?2
             ORDER BY c.scheduled_at ASC, c.rowid ASC",
        )?;
        let summaries = stmt
            .query_map(params![user_id, format_timestamp(now)], |row| {
                Ok(CheckInSummary {
                    id: row.get(0)?,
                    item_id: row.get(1)?,
                    item_name: row.get(2)?,
                    list_name: row.get(3)?,
                    scheduled_at: parse_rfc3339(row.get::<_, String>(4)?, 4)?,
                    notes: row.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(summaries)
    }

    /// Check-ins due at or before `now`, oldest first, joined with what the
    /// call needs. Users without a profile still come back, without contact.
    pub fn due_check_ins(&self, now: DateTime<Utc>) -> Result<Vec<DueCheckIn>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT c.id, c.scheduled_at, c.notes, u.first_name, u.phone_number,
                    i.name, i.notes, l.name
             FROM check_ins c
             LEFT JOIN users u ON u.id = c.user_id
             JOIN items i ON i.id = c.item_id
             JOIN todo_lists l ON l.id = i.list_id
             WHERE c.scheduled_at <= ?1
             ORDER BY c.scheduled_at ASC, c.rowid ASC",
        )?;
        let due = stmt
            .query_map([format_timestamp(now)], |row| {
                Ok(DueCheckIn {
                    id: row.get(0)?,
                    scheduled_at: parse_rfc3339(row.get::<_, String>(1)?, 1)?,
                    notes: row.get(2)?,
                    first_name: row.get(3)?,
                    phone_number: row.get(4)?,
                    item_name: row.get(5)?,
                    item_notes: row.get(6)?,
                    list_name: row.get(7)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(due)
    }

    pub fn delete_check_in(&self, id: &str) -> Result<bool> {
        let conn = self.lock_conn()?;
        let deleted = conn.execute("DELETE FROM check_ins WHERE id = ?1", [id])?;
        Ok(deleted > 0)
    }

    pub fn count_check_ins(&self) -> Result<usize> {
        let conn = self.lock_conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM check_ins", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

// ============================================================================
// Row loading shared by plain reads and the merge transaction
// ============================================================================

/// Fails with `NotFound` unless the list exists under this user.
pub(crate) fn ensure_list_owner(
    conn: &Connection,
    user_id: &str,
    list_id: &str,
) -> Result<(), TodoError> {
    let found: Option<String> = conn
        .query_row(
            "SELECT id FROM todo_lists WHERE id = ?1 AND user_id = ?2",
            params![list_id, user_id],
            |row| row.get(0),
        )
        .optional()?;
    match found {
        Some(_) => Ok(()),
        None => Err(TodoError::NotFound(format!("list '{}'", list_id))),
    }
}

/// Read a list with items, sub-items and messages, each in creation order.
pub(crate) fn load_list(
    conn: &Connection,
    user_id: &str,
    list_id: &str,
) -> Result<Option<TodoList>, TodoError> {
    let header = conn
        .query_row(
            "SELECT id, user_id, name, is_completed, created_at, updated_at
             FROM todo_lists WHERE id = ?1 AND user_id = ?2",
            params![list_id, user_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)? != 0,
                    parse_rfc3339(row.get::<_, String>(4)?, 4)?,
                    parse_rfc3339(row.get::<_, String>(5)?, 5)?,
                ))
            },
        )
        .optional()?;

    let Some((id, user_id, name, is_completed, created_at, updated_at)) = header else {
        return Ok(None);
    };

    let items = load_items(conn, &id)?;
    let messages = load_messages(conn, &id)?;

    Ok(Some(TodoList {
        id,
        user_id,
        name,
        is_completed,
        created_at,
        updated_at,
        items,
        messages,
    }))
}

fn load_items(conn: &Connection, list_id: &str) -> Result<Vec<Item>, TodoError> {
    let mut stmt = conn.prepare(
        "SELECT id, list_id, name, notes, deadline, is_completed, created_at
         FROM items WHERE list_id = ?1 ORDER BY created_at ASC, rowid ASC",
    )?;
    let mut items = stmt
        .query_map([list_id], |row| {
            Ok(Item {
                id: row.get(0)?,
                list_id: row.get(1)?,
                name: row.get(2)?,
                notes: row.get(3)?,
                deadline: parse_deadline(row.get::<_, Option<String>>(4)?, 4)?,
                is_completed: row.get::<_, i64>(5)? != 0,
                created_at: parse_rfc3339(row.get::<_, String>(6)?, 6)?,
                sub_items: Vec::new(),
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut sub_stmt = conn.prepare(
        "SELECT id, item_id, name, is_completed, created_at
         FROM sub_items WHERE item_id = ?1 ORDER BY created_at ASC, rowid ASC",
    )?;
    for item in &mut items {
        item.sub_items = sub_stmt
            .query_map([&item.id], |row| {
                Ok(SubItem {
                    id: row.get(0)?,
                    item_id: row.get(1)?,
                    name: row.get(2)?,
                    is_completed: row.get::<_, i64>(3)? != 0,
                    created_at: parse_rfc3339(row.get::<_, String>(4)?, 4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
    }

    Ok(items)
}

fn load_messages(conn: &Connection, list_id: &str) -> rusqlite::Result<Vec<ChatMessage>> {
    let mut stmt = conn.prepare(
        "SELECT id, list_id, role, content, created_at
         FROM chat_messages WHERE list_id = ?1 ORDER BY created_at ASC, rowid ASC",
    )?;
    let messages = stmt
        .query_map([list_id], |row| {
            Ok(ChatMessage {
                id: row.get(0)?,
                list_id: row.get(1)?,
                role: ChatRole::from_db(&row.get::<_, String>(2)?),
                content: row.get(3)?,
                created_at: parse_rfc3339(row.get::<_, String>(4)?, 4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(messages)
}

pub(crate) fn format_deadline(deadline: Option<NaiveDate>) -> Option<String> {
    deadline.map(|d| d.format(DEADLINE_FORMAT).to_string())
}

fn parse_deadline(raw: Option<String>, idx: usize) -> rusqlite::Result<Option<NaiveDate>> {
    raw.map(|value| {
        NaiveDate::parse_from_str(&value, DEADLINE_FORMAT).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
    })
    .transpose()
}

/// Fixed-width UTC text, so stored timestamps compare correctly as strings.
pub(crate) fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_rfc3339(raw: String, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn open_db() -> (TodoDatabase, TempDir) {
        let dir = TempDir::new().expect("temp dir");
        let db = TodoDatabase::new(dir.path().join("listmate.db")).expect("db init");
        (db, dir)
    }

    fn register(db: &TodoDatabase, id: &str) {
        db.upsert_user(&UserProfile {
            id: id.to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            phone_number: "+15550100".to_string(),
        })
        .expect("upsert user");
    }

    fn insert_item(db: &TodoDatabase, list_id: &str, name: &str) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let conn = db.lock_conn().expect("lock");
        conn.execute(
            "INSERT INTO items (id, list_id, name, is_completed, created_at) VALUES (?1, ?2, ?3, 0, ?4)",
            params![id, list_id, name, format_timestamp(Utc::now())],
        )
        .expect("insert item");
        id
    }

    #[test]
    fn create_list_rejects_blank_name() {
        let (db, _dir) = open_db();
        let err = db.create_list("u1", "   ").unwrap_err();
        assert!(matches!(err, TodoError::Validation { .. }));
        assert!(db.list_lists("u1").expect("list").is_empty());
    }

    #[test]
    fn lists_are_scoped_to_their_owner() {
        let (db, _dir) = open_db();
        let list = db.create_list("u1", "Groceries").expect("create");

        assert!(db.get_list("u1", &list.id).expect("get").is_some());
        assert!(db.get_list("u2", &list.id).expect("get").is_none());
        assert!(db.list_lists("u2").expect("list").is_empty());

        let err = db.delete_list("u2", &list.id).unwrap_err();
        assert!(matches!(err, TodoError::NotFound(_)));
        assert!(db.get_list("u1", &list.id).expect("get").is_some());
    }

    #[test]
    fn chat_messages_append_in_order_and_respect_ownership() {
        let (db, _dir) = open_db();
        let list = db.create_list("u1", "Trip").expect("create");

        db.add_chat_message("u1", &list.id, ChatRole::User, "hi")
            .expect("user turn");
        db.add_chat_message("u1", &list.id, ChatRole::Assistant, "hello")
            .expect("assistant turn");

        let err = db
            .add_chat_message("u2", &list.id, ChatRole::User, "sneaky")
            .unwrap_err();
        assert!(matches!(err, TodoError::NotFound(_)));

        let history = db.chat_history("u1", &list.id).expect("history");
        let roles: Vec<_> = history.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![ChatRole::User, ChatRole::Assistant]);
        assert_eq!(history[1].content, "hello");
    }

    #[test]
    fn deleting_a_list_cascades_to_children() {
        let (db, _dir) = open_db();
        register(&db, "u1");
        let list = db.create_list("u1", "Chores").expect("create");
        let item_id = insert_item(&db, &list.id, "Laundry");
        db.add_chat_message("u1", &list.id, ChatRole::User, "hi")
            .expect("message");
        db.schedule_check_in("u1", &item_id, Utc::now(), None)
            .expect("check-in");

        db.delete_list("u1", &list.id).expect("delete");

        let conn = db.lock_conn().expect("lock");
        for table in ["items", "sub_items", "chat_messages", "check_ins"] {
            let count: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
                .expect("count");
            assert_eq!(count, 0, "{} should be empty", table);
        }
    }

    #[test]
    fn check_in_requires_item_owned_by_user() {
        let (db, _dir) = open_db();
        let list = db.create_list("u1", "Work").expect("create");
        let item_id = insert_item(&db, &list.id, "Report");

        let err = db
            .schedule_check_in("u2", &item_id, Utc::now(), None)
            .unwrap_err();
        assert!(matches!(err, TodoError::NotFound(_)));

        let check_in = db
            .schedule_check_in("u1", &item_id, Utc::now(), Some("  "))
            .expect("schedule");
        assert_eq!(check_in.notes, None);
    }

    #[test]
    fn due_and_upcoming_check_ins_split_on_now() {
        let (db, _dir) = open_db();
        register(&db, "u1");
        let list = db.create_list("u1", "Work").expect("create");
        let item_id = insert_item(&db, &list.id, "Report");
        let now = Utc::now();

        let past = db
            .schedule_check_in("u1", &item_id, now - Duration::minutes(5), Some("overdue"))
            .expect("past");
        let future = db
            .schedule_check_in("u1", &item_id, now + Duration::hours(2), None)
            .expect("future");

        let due = db.due_check_ins(now).expect("due");
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, past.id);
        assert_eq!(due[0].first_name.as_deref(), Some("Ada"));
        assert_eq!(due[0].phone_number.as_deref(), Some("+15550100"));
        assert_eq!(due[0].item_name, "Report");
        assert_eq!(due[0].list_name, "Work");
        assert_eq!(due[0].notes.as_deref(), Some("overdue"));

        let upcoming = db.upcoming_check_ins("u1", now).expect("upcoming");
        assert_eq!(upcoming.len(), 1);
        assert_eq!(upcoming[0].id, future.id);
        assert_eq!(upcoming[0].item_name, "Report");

        assert!(db.delete_check_in(&past.id).expect("delete"));
        assert!(!db.delete_check_in(&past.id).expect("delete again"));
        assert_eq!(db.count_check_ins().expect("count"), 1);
    }

    #[test]
    fn due_check_ins_come_back_oldest_first_up_to_now_inclusive() {
        let (db, _dir) = open_db();
        register(&db, "u1");
        let list = db.create_list("u1", "Work").expect("create");
        let item_id = insert_item(&db, &list.id, "Report");
        let now = DateTime::parse_from_rfc3339("2025-06-01T09:00:00Z")
            .expect("timestamp")
            .with_timezone(&Utc);

        let late = db
            .schedule_check_in("u1", &item_id, now - Duration::seconds(30), None)
            .expect("late");
        let on_time = db
            .schedule_check_in("u1", &item_id, now, None)
            .expect("on time");
        let oldest = db
            .schedule_check_in("u1", &item_id, now - Duration::days(3), None)
            .expect("oldest");
        db.schedule_check_in("u1", &item_id, now + Duration::microseconds(1), None)
            .expect("future");

        let ids: Vec<_> = db
            .due_check_ins(now)
            .expect("due")
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec![oldest.id, late.id, on_time.id]);
        assert_eq!(format_timestamp(now), "2025-06-01T09:00:00.000000Z");
    }

    #[test]
    fn due_check_ins_include_users_without_a_profile() {
        let (db, _dir) = open_db();
        let list = db.create_list("anon", "Chores").expect("create");
        let item_id = insert_item(&db, &list.id, "Dishes");
        let now = Utc::now();
        db.schedule_check_in("anon", &item_id, now - Duration::minutes(1), None)
            .expect("schedule");

        let due = db.due_check_ins(now).expect("due");
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].phone_number, None);
        assert_eq!(due[0].first_name, None);
        assert_eq!(due[0].item_name, "Dishes");
    }

    #[test]
    fn upsert_user_updates_existing_profile() {
        let (db, _dir) = open_db();
        register(&db, "u1");
        db.upsert_user(&UserProfile {
            id: "u1".to_string(),
            first_name: "Grace".to_string(),
            last_name: String::new(),
            phone_number: "+15550199".to_string(),
        })
        .expect("update");

        let user = db.get_user("u1").expect("get").expect("present");
        assert_eq!(user.first_name, "Grace");
        assert_eq!(user.phone_number, "+15550199");

        let err = db
            .upsert_user(&UserProfile {
                id: "u3".to_string(),
                first_name: "No".to_string(),
                last_name: String::new(),
                phone_number: " ".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, TodoError::Validation { .. }));
    }
}
