//! Canonical list shape and the persisted records it is reconciled against.
//!
//! `ListShape` is what flows between the parser, the client and the merge
//! engine. Identities are optional: only entities that already exist in
//! storage carry one, and that identity is authoritative during a merge.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListShape {
    pub name: String,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(default)]
    pub items: Vec<ItemShape>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemShape {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<NaiveDate>,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(default)]
    pub sub_items: Vec<SubItemShape>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubItemShape {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub is_completed: bool,
}

impl ListShape {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_completed: false,
            items: Vec::new(),
        }
    }

    /// True iff the list has at least one item and every item is complete.
    pub fn derived_completion(&self) -> bool {
        !self.items.is_empty() && self.items.iter().all(|item| item.is_completed)
    }

    pub fn refresh_completion(&mut self) {
        self.is_completed = self.derived_completion();
    }

    /// Toggle an item; the flag cascades to all of its sub-items.
    pub fn set_item_completed(&mut self, index: usize, checked: bool) -> bool {
        let Some(item) = self.items.get_mut(index) else {
            return false;
        };
        item.is_completed = checked;
        for sub_item in &mut item.sub_items {
            sub_item.is_completed = checked;
        }
        self.refresh_completion();
        true
    }

    /// Toggle a sub-item; the parent item is complete only if this one was
    /// checked and every sibling is complete too.
    pub fn set_sub_item_completed(
        &mut self,
        item_index: usize,
        sub_index: usize,
        checked: bool,
    ) -> bool {
        let Some(item) = self.items.get_mut(item_index) else {
            return false;
        };
        let Some(sub_item) = item.sub_items.get_mut(sub_index) else {
            return false;
        };
        sub_item.is_completed = checked;
        item.is_completed = checked && item.sub_items.iter().all(|s| s.is_completed);
        self.refresh_completion();
        true
    }

    /// Every identity carried by the shape, items first then sub-items.
    pub fn identities(&self) -> Vec<&str> {
        let mut ids = Vec::new();
        for item in &self.items {
            if let Some(id) = item.id.as_deref() {
                ids.push(id);
            }
            for sub_item in &item.sub_items {
                if let Some(id) = sub_item.id.as_deref() {
                    ids.push(id);
                }
            }
        }
        ids
    }
}

impl ItemShape {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            notes: None,
            deadline: None,
            is_completed: false,
            sub_items: Vec::new(),
        }
    }
}

impl SubItemShape {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            is_completed: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }

    pub fn from_db(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "system" => ChatRole::System,
            "assistant" => ChatRole::Assistant,
            _ => ChatRole::User,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub list_id: String,
    pub role: ChatRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubItem {
    pub id: String,
    pub item_id: String,
    pub name: String,
    pub is_completed: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub list_id: String,
    pub name: String,
    pub notes: Option<String>,
    pub deadline: Option<NaiveDate>,
    pub is_completed: bool,
    pub created_at: DateTime<Utc>,
    pub sub_items: Vec<SubItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoList {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub is_completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub items: Vec<Item>,
    pub messages: Vec<ChatMessage>,
}

impl TodoList {
    /// Canonical shape with every persisted identity attached.
    pub fn to_shape(&self) -> ListShape {
        ListShape {
            name: self.name.clone(),
            is_completed: self.is_completed,
            items: self
                .items
                .iter()
                .map(|item| ItemShape {
                    id: Some(item.id.clone()),
                    name: item.name.clone(),
                    notes: item.notes.clone(),
                    deadline: item.deadline,
                    is_completed: item.is_completed,
                    sub_items: item
                        .sub_items
                        .iter()
                        .map(|sub_item| SubItemShape {
                            id: Some(sub_item.id.clone()),
                            name: sub_item.name.clone(),
                            is_completed: sub_item.is_completed,
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub phone_number: String,
}

/// A pending phone check-in for one item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckIn {
    pub id: String,
    pub item_id: String,
    pub user_id: String,
    pub scheduled_at: DateTime<Utc>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckInSummary {
    pub id: String,
    pub item_id: String,
    pub item_name: String,
    pub list_name: String,
    pub scheduled_at: DateTime<Utc>,
    pub notes: Option<String>,
}

/// Everything the scheduler needs to place one call.
#[derive(Debug, Clone)]
pub struct DueCheckIn {
    pub id: String,
    pub scheduled_at: DateTime<Utc>,
    pub notes: Option<String>,
    /// Contact fields are `None` when the user never saved a profile.
    pub first_name: Option<String>,
    pub phone_number: Option<String>,
    pub item_name: String,
    pub item_notes: Option<String>,
    pub list_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn groceries() -> ListShape {
        let mut milk = ItemShape::new("Milk");
        milk.is_completed = false;
        let mut bread = ItemShape::new("Bread");
        bread.is_completed = true;
        ListShape {
            name: "Groceries".to_string(),
            is_completed: false,
            items: vec![milk, bread],
        }
    }

    #[test]
    fn toggling_last_open_item_completes_the_list() {
        let mut list = groceries();
        assert!(!list.derived_completion());

        assert!(list.set_item_completed(0, true));
        assert!(list.is_completed);
    }

    #[test]
    fn empty_list_is_never_complete() {
        let mut list = ListShape::new("Empty");
        list.refresh_completion();
        assert!(!list.is_completed);
    }

    #[test]
    fn item_toggle_cascades_to_sub_items() {
        let mut list = groceries();
        list.items[0].sub_items = vec![SubItemShape::new("2%"), SubItemShape::new("Oat")];

        list.set_item_completed(0, true);
        assert!(list.items[0].sub_items.iter().all(|s| s.is_completed));

        list.set_item_completed(0, false);
        assert!(list.items[0].sub_items.iter().all(|s| !s.is_completed));
        assert!(!list.is_completed);
    }

    #[test]
    fn sub_item_toggle_completes_item_only_when_all_siblings_done() {
        let mut list = groceries();
        list.items[0].sub_items = vec![SubItemShape::new("2%"), SubItemShape::new("Oat")];

        list.set_sub_item_completed(0, 0, true);
        assert!(!list.items[0].is_completed);
        assert!(!list.is_completed);

        list.set_sub_item_completed(0, 1, true);
        assert!(list.items[0].is_completed);
        assert!(list.is_completed);

        list.set_sub_item_completed(0, 1, false);
        assert!(!list.items[0].is_completed);
    }

    #[test]
    fn out_of_range_toggles_are_ignored() {
        let mut list = groceries();
        assert!(!list.set_item_completed(9, true));
        assert!(!list.set_sub_item_completed(0, 3, true));
        assert_eq!(list, groceries());
    }

    #[test]
    fn shape_omits_absent_identities_when_serialized() {
        let value = serde_json::to_value(groceries()).expect("serialize");
        let first = &value["items"][0];
        assert!(first.get("id").is_none());
        assert!(first.get("notes").is_none());
        assert_eq!(first["is_completed"], false);
    }
}
