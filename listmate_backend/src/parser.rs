//! Extracts the `<todo-list>` block from assistant text.
//!
//! The block is read into a small element tree, lifted into a loosely typed
//! `RawList` (the only place where the sub-item wrapper ambiguity exists),
//! then normalized into a `ListShape`. Nothing loosely typed leaves this
//! module.

use std::sync::OnceLock;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, NaiveDate};
use quick_xml::events::Event;
use quick_xml::Reader;
use regex_lite::Regex;

use crate::model::{ItemShape, ListShape, SubItemShape};

pub const LIST_TAG: &str = "todo-list";

/// Reply text with the tagged block removed, plus the list it encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReply {
    pub message: String,
    pub list: Option<ListShape>,
}

fn block_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<todo-list>[\s\S]*?</todo-list>").expect("valid list regex"))
}

fn fence_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"```[\s\S]*?```").expect("valid fence regex"))
}

/// Split an assistant reply into user-facing text and an optional list.
///
/// Only the first tagged block is used. A block that fails to parse still
/// gets stripped; the caller just receives no list. Text without a block is
/// returned untouched.
pub fn parse_reply(raw: &str) -> ParsedReply {
    let Some(block) = block_regex().find(raw) else {
        return ParsedReply {
            message: raw.to_string(),
            list: None,
        };
    };

    let list = match parse_list_block(block.as_str()) {
        Ok(list) => Some(list),
        Err(e) => {
            tracing::warn!("Failed to parse tagged list block: {:#}", e);
            None
        }
    };

    let mut message = String::with_capacity(raw.len());
    message.push_str(&raw[..block.start()]);
    message.push_str(&raw[block.end()..]);
    // Keeps a stray "list:" from being read as a block marker downstream.
    let message = message.replace("list:", "list!");
    let message = fence_regex().replace_all(&message, "").trim().to_string();

    ParsedReply { message, list }
}

/// Parse one `<todo-list>...</todo-list>` block into the canonical shape.
pub fn parse_list_block(block: &str) -> Result<ListShape> {
    let root = parse_element_tree(block)?;
    if root.name != LIST_TAG {
        bail!("expected <{}> root, found <{}>", LIST_TAG, root.name);
    }
    let raw = RawList::from_node(&root)?;
    Ok(raw.normalize())
}

#[derive(Debug, Default)]
struct XmlNode {
    name: String,
    text: String,
    children: Vec<XmlNode>,
}

impl XmlNode {
    fn named(name: String) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }

    fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    fn child_text(&self, name: &str) -> Option<String> {
        self.child(name)
            .map(|c| c.text.trim().to_string())
            .filter(|t| !t.is_empty())
    }
}

fn parse_element_tree(block: &str) -> Result<XmlNode> {
    let mut reader = Reader::from_str(block);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<XmlNode> = Vec::new();
    let mut root: Option<XmlNode> = None;

    loop {
        let event = reader
            .read_event()
            .with_context(|| format!("malformed XML at byte {}", reader.buffer_position()))?;
        match event {
            Event::Start(start) => {
                let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
                stack.push(XmlNode::named(name));
            }
            Event::Empty(start) => {
                let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
                let node = XmlNode::named(name);
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => root = Some(node),
                }
            }
            Event::Text(text) => {
                if let Some(current) = stack.last_mut() {
                    // Models often emit a bare '&'; keep the raw text rather than fail.
                    let value = text
                        .unescape()
                        .map(|v| v.into_owned())
                        .unwrap_or_else(|_| String::from_utf8_lossy(&text).into_owned());
                    current.text.push_str(&value);
                }
            }
            Event::CData(data) => {
                if let Some(current) = stack.last_mut() {
                    current
                        .text
                        .push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::End(_) => {
                let node = stack
                    .pop()
                    .ok_or_else(|| anyhow!("closing tag without opening tag"))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => root = Some(node),
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        bail!("unclosed <{}> element", open.name);
    }
    root.ok_or_else(|| anyhow!("empty list block"))
}

#[derive(Debug)]
struct RawList {
    name: String,
    is_completed: Option<String>,
    items: Vec<RawItem>,
}

#[derive(Debug)]
struct RawItem {
    name: String,
    notes: Option<String>,
    deadline: Option<String>,
    is_completed: Option<String>,
    sub_items: RawSubItems,
}

#[derive(Debug)]
struct RawSubItem {
    name: String,
    is_completed: Option<String>,
}

/// The shapes models actually emit for sub-items.
#[derive(Debug)]
enum RawSubItems {
    /// `<subItems><subItem>..</subItem>..</subItems>`
    Wrapped(Vec<RawSubItem>),
    /// One `<subItems>` element per sub-item, each holding `<name>` directly.
    Bare(Vec<RawSubItem>),
    /// Absent, empty, or not recognizable.
    Missing,
}

impl RawList {
    fn from_node(node: &XmlNode) -> Result<Self> {
        let name = node
            .child_text("name")
            .ok_or_else(|| anyhow!("list block has no <name>"))?;
        let items_node = node
            .child("items")
            .ok_or_else(|| anyhow!("list block has no <items>"))?;
        let items = items_node
            .children_named("item")
            .enumerate()
            .map(|(index, item)| {
                RawItem::from_node(item).with_context(|| format!("item #{}", index + 1))
            })
            .collect::<Result<Vec<_>>>()?;
        // An empty proposal would tombstone every item on accept.
        if items.is_empty() {
            bail!("list block has no <item> entries");
        }

        Ok(Self {
            name,
            is_completed: node.child_text("isCompleted"),
            items,
        })
    }

    fn normalize(self) -> ListShape {
        ListShape {
            name: self.name,
            is_completed: normalize_flag(self.is_completed.as_deref()),
            items: self.items.into_iter().map(RawItem::normalize).collect(),
        }
    }
}

impl RawItem {
    fn from_node(node: &XmlNode) -> Result<Self> {
        let name = node
            .child_text("name")
            .ok_or_else(|| anyhow!("missing <name>"))?;
        Ok(Self {
            name,
            notes: node.child_text("notes"),
            deadline: node.child_text("deadline"),
            is_completed: node.child_text("isCompleted"),
            sub_items: RawSubItems::from_item(node),
        })
    }

    fn normalize(self) -> ItemShape {
        let deadline = self.deadline.as_deref().and_then(|raw| {
            let parsed = normalize_deadline(raw);
            if parsed.is_none() {
                tracing::warn!("Ignoring unparseable deadline '{}' on '{}'", raw, self.name);
            }
            parsed
        });
        let sub_items = match self.sub_items {
            RawSubItems::Wrapped(items) | RawSubItems::Bare(items) => items
                .into_iter()
                .map(|s| SubItemShape {
                    id: None,
                    name: s.name,
                    is_completed: normalize_flag(s.is_completed.as_deref()),
                })
                .collect(),
            RawSubItems::Missing => Vec::new(),
        };

        ItemShape {
            id: None,
            name: self.name,
            notes: self.notes,
            deadline,
            is_completed: normalize_flag(self.is_completed.as_deref()),
            sub_items,
        }
    }
}

impl RawSubItems {
    fn from_item(item: &XmlNode) -> Self {
        let sections: Vec<&XmlNode> = item.children_named("subItems").collect();
        let Some(first) = sections.first() else {
            return RawSubItems::Missing;
        };

        if sections.len() == 1 && first.child("subItem").is_some() {
            return match collect_sub_items(first.children_named("subItem")) {
                Some(items) => RawSubItems::Wrapped(items),
                None => RawSubItems::Missing,
            };
        }

        if sections.iter().all(|s| s.child("name").is_some()) {
            return match collect_sub_items(sections.into_iter()) {
                Some(items) => RawSubItems::Bare(items),
                None => RawSubItems::Missing,
            };
        }

        RawSubItems::Missing
    }
}

/// All-or-nothing: one nameless entry makes the whole section malformed.
fn collect_sub_items<'a>(nodes: impl Iterator<Item = &'a XmlNode>) -> Option<Vec<RawSubItem>> {
    nodes
        .map(|node| {
            node.child_text("name").map(|name| RawSubItem {
                name,
                is_completed: node.child_text("isCompleted"),
            })
        })
        .collect()
}

fn normalize_flag(raw: Option<&str>) -> bool {
    matches!(
        raw.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("true") | Some("yes") | Some("1")
    )
}

fn normalize_deadline(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_BLOCK: &str = r#"<todo-list>
  <name>Groceries</name>
  <items>
    <item>
      <name>Milk</name>
      <notes>Oat if possible</notes>
      <deadline>2024-12-31</deadline>
      <isCompleted>false</isCompleted>
      <subItems>
        <subItem>
          <name>Check fridge</name>
          <isCompleted>true</isCompleted>
        </subItem>
        <subItem>
          <name>Compare prices</name>
        </subItem>
      </subItems>
    </item>
    <item>
      <name>Bread</name>
      <isCompleted>true</isCompleted>
    </item>
  </items>
</todo-list>"#;

    #[test]
    fn extracts_list_and_strips_block_from_reply() {
        let raw = format!("Sure thing!\n{}", SAMPLE_BLOCK);
        let parsed = parse_reply(&raw);

        assert_eq!(parsed.message, "Sure thing!");
        let list = parsed.list.expect("list present");
        assert_eq!(list.name, "Groceries");
        assert!(!list.is_completed);
        assert_eq!(list.items.len(), 2);
        assert!(!parsed.message.contains("<todo-list>"));
        assert!(!parsed.message.contains("</todo-list>"));
    }

    #[test]
    fn normalizes_optional_fields_and_flags() {
        let list = parse_list_block(SAMPLE_BLOCK).expect("parse");
        let milk = &list.items[0];
        assert_eq!(milk.notes.as_deref(), Some("Oat if possible"));
        assert_eq!(milk.deadline, NaiveDate::from_ymd_opt(2024, 12, 31));
        assert_eq!(milk.sub_items.len(), 2);
        assert!(milk.sub_items[0].is_completed);
        assert!(!milk.sub_items[1].is_completed);

        let bread = &list.items[1];
        assert!(bread.is_completed);
        assert_eq!(bread.notes, None);
        assert_eq!(bread.deadline, None);
        assert!(bread.sub_items.is_empty());
        assert!(list.items.iter().all(|i| i.id.is_none()));
    }

    #[test]
    fn text_without_block_is_returned_unchanged() {
        let raw = "  Here is my list: eggs, ham.\n```\ncode\n```  ";
        let parsed = parse_reply(raw);
        assert_eq!(parsed.message, raw);
        assert!(parsed.list.is_none());
    }

    #[test]
    fn only_the_first_block_is_used() {
        let raw = "One\n<todo-list><name>First</name><items><item><name>a</name></item></items></todo-list>\nTwo\n\
                   <todo-list><name>Second</name><items><item><name>b</name></item></items></todo-list>";
        let parsed = parse_reply(raw);
        assert_eq!(parsed.list.expect("list").name, "First");
    }

    #[test]
    fn malformed_block_yields_no_list_but_keeps_reply() {
        let raw = "I updated it.\n<todo-list><name>Broken</name><items><item></items></todo-list>";
        let parsed = parse_reply(raw);
        assert!(parsed.list.is_none());
        assert_eq!(parsed.message, "I updated it.");
    }

    #[test]
    fn block_without_items_section_is_malformed() {
        assert!(parse_list_block("<todo-list><name>Nothing</name></todo-list>").is_err());
    }

    #[test]
    fn empty_items_section_yields_no_list() {
        assert!(parse_list_block("<todo-list><name>Done</name><items></items></todo-list>").is_err());
        assert!(parse_list_block("<todo-list><name>Done</name><items/></todo-list>").is_err());

        let parsed = parse_reply("Cleared.\n<todo-list><name>Groceries</name><items/></todo-list>");
        assert_eq!(parsed.message, "Cleared.");
        assert!(parsed.list.is_none());
    }

    #[test]
    fn bare_sub_item_form_matches_wrapped_form() {
        let bare = r#"<todo-list><name>L</name><items><item><name>A</name>
            <subItems><name>one</name><isCompleted>true</isCompleted></subItems>
            <subItems><name>two</name></subItems>
            </item></items></todo-list>"#;
        let wrapped = r#"<todo-list><name>L</name><items><item><name>A</name>
            <subItems>
              <subItem><name>one</name><isCompleted>true</isCompleted></subItem>
              <subItem><name>two</name></subItem>
            </subItems>
            </item></items></todo-list>"#;

        let bare = parse_list_block(bare).expect("bare");
        let wrapped = parse_list_block(wrapped).expect("wrapped");
        assert_eq!(bare, wrapped);
        assert_eq!(bare.items[0].sub_items.len(), 2);
    }

    #[test]
    fn malformed_sub_items_normalize_to_empty() {
        let block = r#"<todo-list><name>L</name><items>
            <item><name>A</name><subItems>nothing here</subItems></item>
            <item><name>B</name><subItems><subItem><isCompleted>true</isCompleted></subItem></subItems></item>
            <item><name>C</name><subItems/></item>
            </items></todo-list>"#;
        let list = parse_list_block(block).expect("parse");
        assert_eq!(list.items.len(), 3);
        assert!(list.items.iter().all(|i| i.sub_items.is_empty()));
    }

    #[test]
    fn stray_list_marker_is_neutralized_and_fences_removed() {
        let raw = "Updated your list: see below.\n```xml\n<todo-list><name>L</name><items><item><name>x</name></item></items></todo-list>\n```";
        let parsed = parse_reply(raw);
        assert_eq!(parsed.message, "Updated your list! see below.");
        assert!(parsed.list.is_some());
    }

    #[test]
    fn unescaped_ampersand_is_tolerated() {
        let block = "<todo-list><name>Salt & pepper</name><items><item><name>Salt</name></item></items></todo-list>";
        let list = parse_list_block(block).expect("parse");
        assert_eq!(list.name, "Salt & pepper");
    }

    #[test]
    fn list_level_completion_flag_is_read() {
        let block = "<todo-list><name>L</name><isCompleted>TRUE</isCompleted><items><item><name>x</name></item></items></todo-list>";
        assert!(parse_list_block(block).expect("parse").is_completed);
    }

    #[test]
    fn deadline_accepts_timestamps_and_drops_garbage() {
        assert_eq!(
            normalize_deadline("2025-03-01T09:30:00Z"),
            NaiveDate::from_ymd_opt(2025, 3, 1)
        );
        assert_eq!(normalize_deadline("next tuesday"), None);
    }
}
