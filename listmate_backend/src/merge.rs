//! Transactional reconciliation of an incoming list shape against storage.
//!
//! Entities carrying an identity are updated in place, entities without one
//! are created, and persisted children missing from the incoming identity set
//! are deleted. The whole merge commits or rolls back as one transaction.

use chrono::Utc;
use rusqlite::{params, Connection};
use std::collections::HashSet;

use crate::database::{
    ensure_list_owner, format_deadline, format_timestamp, load_list, TodoDatabase,
};
use crate::errors::TodoError;
use crate::model::{ItemShape, ListShape, SubItemShape, TodoList};

/// Child collections that are reconciled by omission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildTable {
    /// Items under a list.
    Items,
    /// Sub-items under an item.
    SubItems,
}

impl ChildTable {
    fn table(self) -> &'static str {
        match self {
            ChildTable::Items => "items",
            ChildTable::SubItems => "sub_items",
        }
    }

    fn parent_column(self) -> &'static str {
        match self {
            ChildTable::Items => "list_id",
            ChildTable::SubItems => "item_id",
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeStats {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
}

/// Delete every persisted child of `parent_id` whose identity is not in `keep`.
///
/// Returns how many rows were removed. Cascades take care of grandchildren.
pub fn reconcile_by_identity_set(
    conn: &Connection,
    child: ChildTable,
    parent_id: &str,
    keep: &HashSet<&str>,
) -> rusqlite::Result<usize> {
    let select = format!(
        "SELECT id FROM {} WHERE {} = ?1",
        child.table(),
        child.parent_column()
    );
    let existing = {
        let mut stmt = conn.prepare(&select)?;
        let ids = stmt
            .query_map([parent_id], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        ids
    };

    let delete = format!("DELETE FROM {} WHERE id = ?1", child.table());
    let mut removed = 0;
    for id in existing.iter().filter(|id| !keep.contains(id.as_str())) {
        removed += conn.execute(&delete, [id])?;
    }
    Ok(removed)
}

impl TodoDatabase {
    /// Apply `incoming` to the list as one atomic unit and return the result.
    pub fn merge_list(
        &self,
        user_id: &str,
        list_id: &str,
        incoming: &ListShape,
    ) -> Result<TodoList, TodoError> {
        validate_shape(incoming)?;

        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;

        ensure_list_owner(&tx, user_id, list_id)?;

        let now = format_timestamp(Utc::now());
        tx.execute(
            "UPDATE todo_lists SET name = ?1, is_completed = ?2, updated_at = ?3
             WHERE id = ?4 AND user_id = ?5",
            params![
                incoming.name.trim(),
                incoming.is_completed,
                now,
                list_id,
                user_id
            ],
        )?;

        let mut stats = MergeStats::default();

        let keep_items: HashSet<&str> = incoming
            .items
            .iter()
            .filter_map(|item| item.id.as_deref())
            .collect();
        stats.deleted += reconcile_by_identity_set(&tx, ChildTable::Items, list_id, &keep_items)?;

        for item in &incoming.items {
            match item.id.as_deref() {
                Some(item_id) => update_item(&tx, list_id, item_id, item, &mut stats)?,
                None => create_item(&tx, list_id, item, &mut stats)?,
            }
        }

        let merged = load_list(&tx, user_id, list_id)?
            .ok_or_else(|| TodoError::Merge(format!("list '{}' vanished during merge", list_id)))?;
        tx.commit()?;

        tracing::debug!(
            "Merged list {}: {} created, {} updated, {} deleted",
            list_id,
            stats.created,
            stats.updated,
            stats.deleted
        );
        Ok(merged)
    }
}

fn validate_shape(incoming: &ListShape) -> Result<(), TodoError> {
    if incoming.name.trim().is_empty() {
        return Err(TodoError::validation("name", "must not be blank"));
    }

    let mut seen = HashSet::new();
    for (index, item) in incoming.items.iter().enumerate() {
        if item.name.trim().is_empty() {
            return Err(TodoError::validation(
                &format!("items[{}].name", index),
                "must not be blank",
            ));
        }
        for (sub_index, sub_item) in item.sub_items.iter().enumerate() {
            if sub_item.name.trim().is_empty() {
                return Err(TodoError::validation(
                    &format!("items[{}].sub_items[{}].name", index, sub_index),
                    "must not be blank",
                ));
            }
        }
    }

    for id in incoming.identities() {
        if !seen.insert(id) {
            return Err(TodoError::validation(
                "id",
                format!("identity '{}' appears more than once", id),
            ));
        }
    }
    Ok(())
}

fn update_item(
    conn: &Connection,
    list_id: &str,
    item_id: &str,
    item: &ItemShape,
    stats: &mut MergeStats,
) -> Result<(), TodoError> {
    let changed = conn.execute(
        "UPDATE items SET name = ?1, notes = ?2, deadline = ?3, is_completed = ?4
         WHERE id = ?5 AND list_id = ?6",
        params![
            item.name.trim(),
            clean_notes(item.notes.as_deref()),
            format_deadline(item.deadline),
            item.is_completed,
            item_id,
            list_id
        ],
    )?;
    if changed == 0 {
        return Err(TodoError::Merge(format!(
            "item '{}' does not exist under list '{}'",
            item_id, list_id
        )));
    }
    stats.updated += 1;

    let keep_sub_items: HashSet<&str> = item
        .sub_items
        .iter()
        .filter_map(|sub_item| sub_item.id.as_deref())
        .collect();
    stats.deleted +=
        reconcile_by_identity_set(conn, ChildTable::SubItems, item_id, &keep_sub_items)?;

    for sub_item in &item.sub_items {
        match sub_item.id.as_deref() {
            Some(sub_item_id) => {
                let changed = conn.execute(
                    "UPDATE sub_items SET name = ?1, is_completed = ?2
                     WHERE id = ?3 AND item_id = ?4",
                    params![
                        sub_item.name.trim(),
                        sub_item.is_completed,
                        sub_item_id,
                        item_id
                    ],
                )?;
                if changed == 0 {
                    return Err(TodoError::Merge(format!(
                        "sub-item '{}' does not exist under item '{}'",
                        sub_item_id, item_id
                    )));
                }
                stats.updated += 1;
            }
            None => {
                create_sub_item(conn, item_id, sub_item)?;
                stats.created += 1;
            }
        }
    }
    Ok(())
}

/// New items are created with all of their sub-items. Identities on nested
/// sub-items of a new item are ignored since nothing could have persisted them.
fn create_item(
    conn: &Connection,
    list_id: &str,
    item: &ItemShape,
    stats: &mut MergeStats,
) -> Result<(), TodoError> {
    let item_id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO items (id, list_id, name, notes, deadline, is_completed, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            item_id,
            list_id,
            item.name.trim(),
            clean_notes(item.notes.as_deref()),
            format_deadline(item.deadline),
            item.is_completed,
            format_timestamp(Utc::now())
        ],
    )?;
    stats.created += 1;

    for sub_item in &item.sub_items {
        create_sub_item(conn, &item_id, sub_item)?;
        stats.created += 1;
    }
    Ok(())
}

fn create_sub_item(conn: &Connection, item_id: &str, sub_item: &SubItemShape) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO sub_items (id, item_id, name, is_completed, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            uuid::Uuid::new_v4().to_string(),
            item_id,
            sub_item.name.trim(),
            sub_item.is_completed,
            format_timestamp(Utc::now())
        ],
    )?;
    Ok(())
}

fn clean_notes(notes: Option<&str>) -> Option<&str> {
    notes.map(str::trim).filter(|n| !n.is_empty())
}
