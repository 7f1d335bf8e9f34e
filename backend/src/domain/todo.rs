//! List, item, and collaboration data models.
//!
//! Enum-valued columns are stored as text; parsing happens once at the
//! boundary so repositories only ever see validated values. The sort field
//! is an allow-listed enum, which makes unvalidated interpolation into SQL
//! impossible by construction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::DataError;

/// Collaboration role on a list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Owner,
    Editor,
    Viewer,
}

impl Role {
    /// Stored text form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Owner => "OWNER",
            Self::Editor => "EDITOR",
            Self::Viewer => "VIEWER",
        }
    }

    /// Parse the stored text form, rejecting unknown values.
    pub fn parse(value: &str) -> Result<Self, DataError> {
        match value {
            "OWNER" => Ok(Self::Owner),
            "EDITOR" => Ok(Self::Editor),
            "VIEWER" => Ok(Self::Viewer),
            other => Err(DataError::invariant(format!("unknown role: {other}"))),
        }
    }
}

/// Progress state of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    NotStarted,
    InProgress,
    Completed,
}

impl ItemStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Result<Self, DataError> {
        match value {
            "not_started" => Ok(Self::NotStarted),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            other => Err(DataError::invariant(format!("unknown status: {other}"))),
        }
    }
}

/// Priority level of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    pub fn parse(value: &str) -> Result<Self, DataError> {
        match value {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => Err(DataError::invariant(format!("unknown priority: {other}"))),
        }
    }
}

/// A list of items owned by one user and shared with collaborators.
///
/// `is_deleted` is a schema-level soft-delete flag; reads do not consult it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoList {
    pub id: i64,
    pub owner_id: i64,
    pub title: String,
    pub version: i32,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Role of the user the list was fetched for; populated only on the
    /// by-user enumeration path.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub role: Option<Role>,
}

/// A single task row.
///
/// `content` and `name` duplicate the same data for backward compatibility:
/// new writes populate both, reads prefer `name` when set. `is_done` mirrors
/// `status == completed` by convention only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: i64,
    pub list_id: i64,
    pub content: String,
    pub name: String,
    pub description: String,
    pub status: ItemStatus,
    pub priority: Priority,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    /// Comma-joined tag list.
    pub tags: String,
    pub is_done: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Draft of an item before persistence; the store mints the ID and applies
/// the legacy-field defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemDraft {
    pub content: String,
    pub name: String,
    pub description: String,
    pub status: Option<ItemStatus>,
    pub priority: Option<Priority>,
    pub due_date: Option<DateTime<Utc>>,
    pub tags: String,
    pub is_done: bool,
}

impl ItemDraft {
    /// Apply the backward-compatibility defaults: `name` falls back to
    /// `content`, unset status becomes `not_started`, unset priority
    /// becomes `medium`.
    pub fn with_defaults(mut self) -> Self {
        if self.name.is_empty() && !self.content.is_empty() {
            self.content.clone_into(&mut self.name);
        }
        self.status.get_or_insert(ItemStatus::NotStarted);
        self.priority.get_or_insert(Priority::Medium);
        self
    }

    /// Status after defaulting.
    pub fn status(&self) -> ItemStatus {
        self.status.unwrap_or(ItemStatus::NotStarted)
    }

    /// Priority after defaulting.
    pub fn priority(&self) -> Priority {
        self.priority.unwrap_or(Priority::Medium)
    }
}

/// Changes applied to an existing item. The `list_id` routing argument
/// travels separately; an item ID alone cannot locate a shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemUpdate {
    pub item_id: i64,
    pub name: String,
    pub description: String,
    pub status: ItemStatus,
    pub priority: Priority,
    pub due_date: Option<DateTime<Utc>>,
    pub tags: String,
    pub is_done: bool,
}

/// A membership row binding a user to a list in a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListCollaborator {
    pub list_id: i64,
    pub user_id: i64,
    pub role: Role,
}

/// Filter criteria for item queries; all conjuncts are optional, tags match
/// as a disjunction of substring matches on the comma-joined column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemFilter {
    pub status: Option<ItemStatus>,
    pub priority: Option<Priority>,
    pub due_before: Option<DateTime<Utc>>,
    pub due_after: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
}

impl ItemFilter {
    /// True when no conjunct is set.
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.priority.is_none()
            && self.due_before.is_none()
            && self.due_after.is_none()
            && self.tags.is_empty()
    }
}

/// Allow-listed sortable columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemSortField {
    DueDate,
    Priority,
    Status,
    Name,
    CreatedAt,
}

impl ItemSortField {
    /// Column name; safe to splice into SQL because the set is closed.
    pub fn column(self) -> &'static str {
        match self {
            Self::DueDate => "due_date",
            Self::Priority => "priority",
            Self::Status => "status",
            Self::Name => "name",
            Self::CreatedAt => "created_at",
        }
    }
}

/// Sort specification for item queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemSort {
    pub field: ItemSortField,
    pub descending: bool,
}

impl ItemSort {
    /// The default ordering: newest first.
    pub const DEFAULT: Self = Self {
        field: ItemSortField::CreatedAt,
        descending: true,
    };

    /// Map a raw field name onto the allow-list. Anything outside the list
    /// falls back to the default ordering rather than reaching the query
    /// builder.
    pub fn parse(field: &str, descending: bool) -> Self {
        let field = match field {
            "due_date" => ItemSortField::DueDate,
            "priority" => ItemSortField::Priority,
            "status" => ItemSortField::Status,
            "name" => ItemSortField::Name,
            "created_at" => ItemSortField::CreatedAt,
            _ => return Self::DEFAULT,
        };
        Self { field, descending }
    }
}

impl Default for ItemSort {
    fn default() -> Self {
        Self::DEFAULT
    }
}
