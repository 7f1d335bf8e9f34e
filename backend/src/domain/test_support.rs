//! In-memory port doubles for service-level tests.
//!
//! These mirror the observable behavior of the sharded stores (unique-key
//! conflicts, index-driven enumeration, filter/sort semantics) without a
//! database.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;

use crate::domain::ports::{TodoStore, UserStore};
use crate::domain::{
    DataError, ItemDraft, ItemFilter, ItemSort, ItemSortField, ItemUpdate, NewUser, Role, TodoItem,
    TodoList, User,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Map-backed [`UserStore`] with a unique email index.
#[derive(Default)]
pub struct InMemoryUserStore {
    next_id: AtomicI64,
    users: Mutex<HashMap<i64, User>>,
    emails: Mutex<HashMap<String, i64>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            ..Self::default()
        }
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn create(&self, new_user: NewUser) -> Result<User, DataError> {
        let mut emails = lock(&self.emails);
        if emails.contains_key(new_user.email()) {
            return Err(DataError::conflict("duplicate email"));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let user = User {
            id,
            email: new_user.email().to_owned(),
            password_hash: new_user.password_hash().to_owned(),
            verification_code: new_user.verification_code().to_owned(),
            is_verified: false,
            created_at: Utc::now(),
        };
        emails.insert(user.email.clone(), id);
        lock(&self.users).insert(id, user.clone());
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, DataError> {
        let id = match lock(&self.emails).get(email) {
            Some(id) => *id,
            None => return Ok(None),
        };
        Ok(lock(&self.users).get(&id).cloned())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<User>, DataError> {
        Ok(lock(&self.users).get(&id).cloned())
    }

    async fn set_verified(&self, email: &str, verified: bool) -> Result<(), DataError> {
        let id = *lock(&self.emails)
            .get(email)
            .ok_or_else(|| DataError::not_found("no user for email"))?;
        let mut users = lock(&self.users);
        let user = users
            .get_mut(&id)
            .ok_or_else(|| DataError::not_found("user row missing"))?;
        user.is_verified = verified;
        Ok(())
    }
}

/// Map-backed [`TodoStore`] with an in-memory user-list index.
#[derive(Default)]
pub struct InMemoryTodoStore {
    next_id: AtomicI64,
    lists: Mutex<HashMap<i64, TodoList>>,
    items: Mutex<HashMap<i64, Vec<TodoItem>>>,
    index: Mutex<Vec<(i64, i64, Role)>>,
    collaborators: Mutex<Vec<(i64, i64)>>,
}

impl InMemoryTodoStore {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            ..Self::default()
        }
    }

    /// Raw index rows, for asserting cross-table effects.
    pub fn index_rows(&self) -> Vec<(i64, i64, Role)> {
        lock(&self.index).clone()
    }
}

#[async_trait]
impl TodoStore for InMemoryTodoStore {
    async fn create_list(&self, owner_id: i64, title: &str) -> Result<TodoList, DataError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        let list = TodoList {
            id,
            owner_id,
            title: title.to_owned(),
            version: 1,
            is_deleted: false,
            created_at: now,
            updated_at: now,
            role: Some(Role::Owner),
        };
        lock(&self.lists).insert(id, list.clone());
        lock(&self.index).push((owner_id, id, Role::Owner));
        Ok(list)
    }

    async fn lists_for_user(&self, user_id: i64) -> Result<Vec<TodoList>, DataError> {
        let refs: Vec<(i64, Role)> = lock(&self.index)
            .iter()
            .filter(|(user, _, _)| *user == user_id)
            .map(|(_, list, role)| (*list, *role))
            .collect();

        let lists = lock(&self.lists);
        Ok(refs
            .into_iter()
            .filter_map(|(list_id, role)| {
                lists.get(&list_id).cloned().map(|mut list| {
                    list.role = Some(role);
                    list
                })
            })
            .collect())
    }

    async fn find_list(&self, list_id: i64) -> Result<Option<TodoList>, DataError> {
        Ok(lock(&self.lists).get(&list_id).cloned())
    }

    async fn delete_list(&self, list_id: i64) -> Result<(), DataError> {
        lock(&self.lists).remove(&list_id);
        lock(&self.items).remove(&list_id);
        Ok(())
    }

    async fn add_collaborator(
        &self,
        list_id: i64,
        user_id: i64,
        role: Role,
    ) -> Result<(), DataError> {
        let mut collaborators = lock(&self.collaborators);
        if collaborators.contains(&(list_id, user_id)) {
            return Err(DataError::conflict("duplicate collaborator"));
        }
        collaborators.push((list_id, user_id));
        lock(&self.index).push((user_id, list_id, role));
        Ok(())
    }

    async fn create_item(&self, list_id: i64, draft: ItemDraft) -> Result<TodoItem, DataError> {
        let draft = draft.with_defaults();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        let item = TodoItem {
            id,
            list_id,
            content: draft.content.clone(),
            name: draft.name.clone(),
            description: draft.description.clone(),
            status: draft.status(),
            priority: draft.priority(),
            due_date: draft.due_date,
            tags: draft.tags.clone(),
            is_done: draft.is_done,
            created_at: now,
            updated_at: now,
        };
        lock(&self.items).entry(list_id).or_default().push(item.clone());
        Ok(item)
    }

    async fn items_for_list(&self, list_id: i64) -> Result<Vec<TodoItem>, DataError> {
        let mut items = lock(&self.items)
            .get(&list_id)
            .cloned()
            .unwrap_or_default();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(items)
    }

    async fn items_for_list_filtered(
        &self,
        list_id: i64,
        filter: &ItemFilter,
        sort: ItemSort,
    ) -> Result<Vec<TodoItem>, DataError> {
        let mut items: Vec<TodoItem> = lock(&self.items)
            .get(&list_id)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|item| {
                filter.status.is_none_or(|status| item.status == status)
                    && filter.priority.is_none_or(|priority| item.priority == priority)
                    && filter
                        .due_before
                        .is_none_or(|bound| item.due_date.is_some_and(|due| due < bound))
                    && filter
                        .due_after
                        .is_none_or(|bound| item.due_date.is_some_and(|due| due > bound))
                    && (filter.tags.is_empty()
                        || filter.tags.iter().any(|tag| item.tags.contains(tag)))
            })
            .collect();

        // Text columns compare lexically, matching the stored representation.
        items.sort_by(|a, b| {
            let ordering = match sort.field {
                ItemSortField::DueDate => a.due_date.cmp(&b.due_date),
                ItemSortField::Priority => a.priority.as_str().cmp(b.priority.as_str()),
                ItemSortField::Status => a.status.as_str().cmp(b.status.as_str()),
                ItemSortField::Name => a.name.cmp(&b.name),
                ItemSortField::CreatedAt => a.created_at.cmp(&b.created_at),
            };
            if sort.descending {
                ordering.reverse()
            } else {
                ordering
            }
        });
        Ok(items)
    }

    async fn update_item(&self, list_id: i64, update: ItemUpdate) -> Result<(), DataError> {
        let mut items = lock(&self.items);
        let list_items = items
            .get_mut(&list_id)
            .ok_or_else(|| DataError::not_found("no such list"))?;
        let item = list_items
            .iter_mut()
            .find(|item| item.id == update.item_id)
            .ok_or_else(|| DataError::not_found("no such item"))?;

        update.name.clone_into(&mut item.name);
        update.description.clone_into(&mut item.description);
        item.status = update.status;
        item.priority = update.priority;
        item.due_date = update.due_date;
        update.tags.clone_into(&mut item.tags);
        item.is_done = update.is_done;
        item.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_item(&self, list_id: i64, item_id: i64) -> Result<(), DataError> {
        let mut items = lock(&self.items);
        let list_items = items
            .get_mut(&list_id)
            .ok_or_else(|| DataError::not_found("no such list"))?;
        let before = list_items.len();
        list_items.retain(|item| item.id != item_id);
        if list_items.len() == before {
            return Err(DataError::not_found("no such item"));
        }
        Ok(())
    }
}
