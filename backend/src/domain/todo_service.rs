//! Business logic over the sharded list/item store.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::ports::{TodoStore, UserStore};
use crate::domain::{
    DataError, ItemDraft, ItemFilter, ItemSort, ItemUpdate, Role, TodoItem, TodoList,
};

/// Failures surfaced by list operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TodoServiceError {
    #[error("list not found")]
    ListNotFound,

    /// The caller is not the list owner.
    #[error("permission denied")]
    PermissionDenied,

    /// Share target email resolves to no account.
    #[error("target user not found")]
    TargetUserNotFound,

    #[error(transparent)]
    Store(#[from] DataError),
}

/// Service surface for list and item operations.
///
/// The cache wrapper decorates this trait, so both the plain and cached
/// services are interchangeable to callers.
#[async_trait]
pub trait ListService: Send + Sync {
    async fn create_list(&self, user_id: i64, title: &str) -> Result<TodoList, TodoServiceError>;

    async fn get_lists(&self, user_id: i64) -> Result<Vec<TodoList>, TodoServiceError>;

    /// Owner-only. The list row disappears; collaborators' index rows are
    /// left behind by design.
    async fn delete_list(&self, user_id: i64, list_id: i64) -> Result<(), TodoServiceError>;

    /// Owner-only. Grants `role` on the list to the account owning
    /// `target_email`.
    async fn share_list(
        &self,
        owner_id: i64,
        list_id: i64,
        target_email: &str,
        role: Role,
    ) -> Result<(), TodoServiceError>;

    /// Legacy single-field item creation; `content` doubles as the name.
    async fn add_item(
        &self,
        user_id: i64,
        list_id: i64,
        content: &str,
    ) -> Result<TodoItem, TodoServiceError>;

    /// Full item creation with defaults applied for unset fields.
    async fn create_item(
        &self,
        user_id: i64,
        list_id: i64,
        draft: ItemDraft,
    ) -> Result<TodoItem, TodoServiceError>;

    async fn get_items(&self, user_id: i64, list_id: i64)
        -> Result<Vec<TodoItem>, TodoServiceError>;

    async fn get_items_filtered(
        &self,
        user_id: i64,
        list_id: i64,
        filter: &ItemFilter,
        sort: ItemSort,
    ) -> Result<Vec<TodoItem>, TodoServiceError>;

    async fn update_item(
        &self,
        user_id: i64,
        list_id: i64,
        update: ItemUpdate,
    ) -> Result<(), TodoServiceError>;

    async fn delete_item(
        &self,
        user_id: i64,
        list_id: i64,
        item_id: i64,
    ) -> Result<(), TodoServiceError>;
}

/// Store-backed implementation of [`ListService`].
pub struct TodoService {
    todos: Arc<dyn TodoStore>,
    users: Arc<dyn UserStore>,
}

impl TodoService {
    pub fn new(todos: Arc<dyn TodoStore>, users: Arc<dyn UserStore>) -> Self {
        Self { todos, users }
    }

    async fn require_owner(&self, user_id: i64, list_id: i64) -> Result<TodoList, TodoServiceError> {
        let list = self
            .todos
            .find_list(list_id)
            .await?
            .ok_or(TodoServiceError::ListNotFound)?;
        if list.owner_id != user_id {
            return Err(TodoServiceError::PermissionDenied);
        }
        Ok(list)
    }
}

#[async_trait]
impl ListService for TodoService {
    async fn create_list(&self, user_id: i64, title: &str) -> Result<TodoList, TodoServiceError> {
        Ok(self.todos.create_list(user_id, title).await?)
    }

    async fn get_lists(&self, user_id: i64) -> Result<Vec<TodoList>, TodoServiceError> {
        Ok(self.todos.lists_for_user(user_id).await?)
    }

    async fn delete_list(&self, user_id: i64, list_id: i64) -> Result<(), TodoServiceError> {
        self.require_owner(user_id, list_id).await?;
        Ok(self.todos.delete_list(list_id).await?)
    }

    async fn share_list(
        &self,
        owner_id: i64,
        list_id: i64,
        target_email: &str,
        role: Role,
    ) -> Result<(), TodoServiceError> {
        self.require_owner(owner_id, list_id).await?;

        let target = self
            .users
            .find_by_email(target_email)
            .await?
            .ok_or(TodoServiceError::TargetUserNotFound)?;

        Ok(self.todos.add_collaborator(list_id, target.id, role).await?)
    }

    async fn add_item(
        &self,
        _user_id: i64,
        list_id: i64,
        content: &str,
    ) -> Result<TodoItem, TodoServiceError> {
        // TODO: enforce collaborator roles on item mutations once the
        // editor/viewer permission matrix is wired through.
        let draft = ItemDraft {
            content: content.to_owned(),
            name: content.to_owned(),
            ..ItemDraft::default()
        };
        Ok(self.todos.create_item(list_id, draft).await?)
    }

    async fn create_item(
        &self,
        _user_id: i64,
        list_id: i64,
        draft: ItemDraft,
    ) -> Result<TodoItem, TodoServiceError> {
        Ok(self.todos.create_item(list_id, draft).await?)
    }

    async fn get_items(
        &self,
        _user_id: i64,
        list_id: i64,
    ) -> Result<Vec<TodoItem>, TodoServiceError> {
        Ok(self.todos.items_for_list(list_id).await?)
    }

    async fn get_items_filtered(
        &self,
        _user_id: i64,
        list_id: i64,
        filter: &ItemFilter,
        sort: ItemSort,
    ) -> Result<Vec<TodoItem>, TodoServiceError> {
        Ok(self
            .todos
            .items_for_list_filtered(list_id, filter, sort)
            .await?)
    }

    async fn update_item(
        &self,
        _user_id: i64,
        list_id: i64,
        update: ItemUpdate,
    ) -> Result<(), TodoServiceError> {
        Ok(self.todos.update_item(list_id, update).await?)
    }

    async fn delete_item(
        &self,
        _user_id: i64,
        list_id: i64,
        item_id: i64,
    ) -> Result<(), TodoServiceError> {
        Ok(self.todos.delete_item(list_id, item_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::test_support::{InMemoryTodoStore, InMemoryUserStore};
    use crate::domain::{ItemStatus, NewUser, Priority};
    use rstest::{fixture, rstest};

    struct World {
        service: TodoService,
        todos: Arc<InMemoryTodoStore>,
        users: Arc<InMemoryUserStore>,
    }

    #[fixture]
    fn world() -> World {
        let todos = Arc::new(InMemoryTodoStore::new());
        let users = Arc::new(InMemoryUserStore::new());
        World {
            service: TodoService::new(todos.clone(), users.clone()),
            todos,
            users,
        }
    }

    async fn seed_user(users: &InMemoryUserStore, email: &str) -> i64 {
        users
            .create(NewUser::try_new(email, "digest", "0000").expect("valid user"))
            .await
            .expect("user stored")
            .id
    }

    #[rstest]
    #[tokio::test]
    async fn created_lists_are_enumerable_by_owner(world: World) {
        let list = world
            .service
            .create_list(7, "groceries")
            .await
            .expect("list created");

        let lists = world.service.get_lists(7).await.expect("lists fetched");
        assert_eq!(lists.len(), 1);
        assert_eq!(lists[0].id, list.id);
        assert_eq!(lists[0].role, Some(Role::Owner));
    }

    #[rstest]
    #[tokio::test]
    async fn delete_list_is_owner_only(world: World) {
        let list = world
            .service
            .create_list(7, "groceries")
            .await
            .expect("list created");

        let err = world
            .service
            .delete_list(8, list.id)
            .await
            .expect_err("non-owner rejected");
        assert_eq!(err, TodoServiceError::PermissionDenied);

        world
            .service
            .delete_list(7, list.id)
            .await
            .expect("owner deletes");
        assert!(world
            .todos
            .find_list(list.id)
            .await
            .expect("lookup works")
            .is_none());
    }

    #[rstest]
    #[tokio::test]
    async fn share_list_grants_the_target_role(world: World) {
        let target_id = seed_user(&world.users, "b@x").await;
        let list = world
            .service
            .create_list(7, "shared")
            .await
            .expect("list created");

        world
            .service
            .share_list(7, list.id, "b@x", Role::Editor)
            .await
            .expect("share succeeds");

        let lists = world
            .service
            .get_lists(target_id)
            .await
            .expect("target enumerates");
        assert_eq!(lists.len(), 1);
        assert_eq!(lists[0].role, Some(Role::Editor));
    }

    #[rstest]
    #[tokio::test]
    async fn share_list_rejects_unknown_targets(world: World) {
        let list = world
            .service
            .create_list(7, "shared")
            .await
            .expect("list created");

        let err = world
            .service
            .share_list(7, list.id, "ghost@x", Role::Viewer)
            .await
            .expect_err("unknown target");
        assert_eq!(err, TodoServiceError::TargetUserNotFound);
    }

    #[rstest]
    #[tokio::test]
    async fn add_item_applies_legacy_defaults(world: World) {
        let list = world
            .service
            .create_list(7, "groceries")
            .await
            .expect("list created");

        let item = world
            .service
            .add_item(7, list.id, "buy milk")
            .await
            .expect("item created");

        assert_eq!(item.name, "buy milk");
        assert_eq!(item.content, "buy milk");
        assert_eq!(item.status, ItemStatus::NotStarted);
        assert_eq!(item.priority, Priority::Medium);
        assert!(!item.is_done);
    }

    #[rstest]
    #[tokio::test]
    async fn filtered_reads_pass_through_to_the_store(world: World) {
        let list = world
            .service
            .create_list(7, "work")
            .await
            .expect("list created");
        world
            .service
            .create_item(
                7,
                list.id,
                ItemDraft {
                    name: "ship it".into(),
                    status: Some(ItemStatus::InProgress),
                    priority: Some(Priority::High),
                    ..ItemDraft::default()
                },
            )
            .await
            .expect("item created");
        world
            .service
            .create_item(
                7,
                list.id,
                ItemDraft {
                    name: "done already".into(),
                    status: Some(ItemStatus::Completed),
                    priority: Some(Priority::Low),
                    ..ItemDraft::default()
                },
            )
            .await
            .expect("item created");

        let filter = ItemFilter {
            status: Some(ItemStatus::InProgress),
            ..ItemFilter::default()
        };
        let items = world
            .service
            .get_items_filtered(7, list.id, &filter, ItemSort::parse("due_date", false))
            .await
            .expect("filtered fetch");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "ship it");
    }
}
