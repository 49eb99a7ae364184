use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::model::{NewUser, ProfileChanges, Role, User, UserFilter, UserStats};
use super::repo::UserRepo;
use crate::error::{AppError, AppResult};

/// In-process credential store selected with `DATABASE_URL=memory://`.
/// Records are kept in insertion order.
#[derive(Default)]
pub struct MemoryUserRepo {
    users: RwLock<Vec<User>>,
}

impl MemoryUserRepo {
    pub fn new() -> Self {
        Self::default()
    }

    fn conflict(users: &[User], username: Option<&str>, email: Option<&str>, skip: Option<Uuid>) -> Option<AppError> {
        let others = || users.iter().filter(move |u| Some(u.id) != skip);
        if let Some(username) = username {
            if others().any(|u| u.username == username) {
                return Some(AppError::DuplicateIdentity("Username already taken".into()));
            }
        }
        if let Some(email) = email {
            if others().any(|u| u.email == email) {
                return Some(AppError::DuplicateIdentity("Email already registered".into()));
            }
        }
        None
    }

    async fn mutate<F>(&self, id: Uuid, f: F) -> Option<User>
    where
        F: FnOnce(&mut User),
    {
        let mut users = self.users.write().await;
        let user = users.iter_mut().find(|u| u.id == id)?;
        f(user);
        user.updated_at = OffsetDateTime::now_utc();
        Some(user.clone())
    }
}

#[async_trait]
impl UserRepo for MemoryUserRepo {
    async fn create(&self, new: NewUser) -> AppResult<User> {
        let email = new.email.to_lowercase();
        let mut users = self.users.write().await;
        if let Some(err) = Self::conflict(&users, Some(&new.username), Some(&email), None) {
            return Err(err);
        }
        let now = OffsetDateTime::now_utc();
        let user = User {
            id: Uuid::new_v4(),
            username: new.username,
            email,
            password_hash: new.password_hash,
            first_name: new.first_name,
            last_name: new.last_name,
            profile_picture: None,
            role: new.role,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        users.push(user.clone());
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<User>> {
        Ok(self.users.read().await.iter().find(|u| u.id == id).cloned())
    }

    async fn find_by_username(&self, username: &str) -> AppResult<Option<User>> {
        Ok(self
            .users
            .read()
            .await
            .iter()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn find_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let email = email.to_lowercase();
        Ok(self.users.read().await.iter().find(|u| u.email == email).cloned())
    }

    async fn find_by_identifier(&self, identifier: &str) -> AppResult<Option<User>> {
        let lowered = identifier.to_lowercase();
        Ok(self
            .users
            .read()
            .await
            .iter()
            .find(|u| u.username == identifier || u.email == lowered)
            .cloned())
    }

    async fn update_profile(&self, id: Uuid, changes: ProfileChanges) -> AppResult<Option<User>> {
        let email = changes.email.map(|e| e.to_lowercase());
        // One write guard covers the conflict check and the update.
        let mut users = self.users.write().await;
        if let Some(err) = Self::conflict(&users, None, email.as_deref(), Some(id)) {
            return Err(err);
        }
        let Some(user) = users.iter_mut().find(|u| u.id == id) else {
            return Ok(None);
        };
        if let Some(first) = changes.first_name {
            user.first_name = first;
        }
        if let Some(last) = changes.last_name {
            user.last_name = last;
        }
        if let Some(email) = email {
            user.email = email;
        }
        user.updated_at = OffsetDateTime::now_utc();
        Ok(Some(user.clone()))
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> AppResult<bool> {
        let hash = password_hash.to_string();
        Ok(self.mutate(id, |u| u.password_hash = hash).await.is_some())
    }

    async fn set_status(&self, id: Uuid, is_active: bool) -> AppResult<Option<User>> {
        Ok(self.mutate(id, |u| u.is_active = is_active).await)
    }

    async fn set_role(&self, id: Uuid, role: Role) -> AppResult<Option<User>> {
        Ok(self.mutate(id, |u| u.role = role).await)
    }

    async fn set_profile_picture(
        &self,
        id: Uuid,
        picture: Option<&str>,
    ) -> AppResult<Option<User>> {
        let picture = picture.map(String::from);
        Ok(self.mutate(id, |u| u.profile_picture = picture).await)
    }

    async fn delete(&self, id: Uuid) -> AppResult<bool> {
        let mut users = self.users.write().await;
        let before = users.len();
        users.retain(|u| u.id != id);
        Ok(users.len() != before)
    }

    async fn list(
        &self,
        filter: &UserFilter,
        limit: i64,
        offset: i64,
    ) -> AppResult<(Vec<User>, i64)> {
        let users = self.users.read().await;
        // Reverse first so records sharing a timestamp still come out newest first.
        let mut matched: Vec<&User> = users.iter().rev().filter(|u| filter.matches(u)).collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = matched.len() as i64;
        let page = matched
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn stats(&self, recent_since: OffsetDateTime) -> AppResult<UserStats> {
        let users = self.users.read().await;
        let total = users.len() as i64;
        let active = users.iter().filter(|u| u.is_active).count() as i64;
        let admins = users.iter().filter(|u| u.is_admin()).count() as i64;
        let recent = users.iter().filter(|u| u.created_at >= recent_since).count() as i64;
        Ok(UserStats {
            total_users: total,
            active_users: active,
            inactive_users: total - active,
            admin_users: admins,
            regular_users: total - admins,
            recent_users: recent,
        })
    }
}
