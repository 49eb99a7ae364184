use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use time::OffsetDateTime;
use uuid::Uuid;

use super::model::{NewUser, ProfileChanges, Role, User, UserFilter, UserStats};
use crate::error::{AppError, AppResult};

/// Credential store. Both backends enforce username and email uniqueness
/// themselves, surfacing violations as [`AppError::DuplicateIdentity`].
#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn create(&self, new: NewUser) -> AppResult<User>;
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<User>>;
    async fn find_by_username(&self, username: &str) -> AppResult<Option<User>>;
    async fn find_by_email(&self, email: &str) -> AppResult<Option<User>>;
    /// Matches `identifier` against the username or the (lowercased) email.
    async fn find_by_identifier(&self, identifier: &str) -> AppResult<Option<User>>;
    async fn update_profile(&self, id: Uuid, changes: ProfileChanges) -> AppResult<Option<User>>;
    async fn update_password(&self, id: Uuid, password_hash: &str) -> AppResult<bool>;
    async fn set_status(&self, id: Uuid, is_active: bool) -> AppResult<Option<User>>;
    async fn set_role(&self, id: Uuid, role: Role) -> AppResult<Option<User>>;
    async fn set_profile_picture(&self, id: Uuid, picture: Option<&str>)
        -> AppResult<Option<User>>;
    async fn delete(&self, id: Uuid) -> AppResult<bool>;
    /// Newest first, plus the total number of matches ignoring `limit`/`offset`.
    async fn list(
        &self,
        filter: &UserFilter,
        limit: i64,
        offset: i64,
    ) -> AppResult<(Vec<User>, i64)>;
    async fn stats(&self, recent_since: OffsetDateTime) -> AppResult<UserStats>;
}

const USER_COLUMNS: &str = "id, username, email, password_hash, first_name, last_name, \
     profile_picture, role, is_active, created_at, updated_at";

#[derive(Clone)]
pub struct PgUserRepo {
    db: PgPool,
}

impl PgUserRepo {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

/// Maps unique-index violations onto the identity they protect.
fn map_unique(err: sqlx::Error) -> AppError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            let message = match db.constraint() {
                Some(c) if c.contains("email") => "Email already registered",
                Some(c) if c.contains("username") => "Username already taken",
                _ => "User with this email or username already exists",
            };
            return AppError::DuplicateIdentity(message.into());
        }
    }
    AppError::Database(err)
}

fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &UserFilter) {
    qb.push(" WHERE TRUE");
    if let Some(search) = &filter.search {
        let pattern = format!("%{}%", escape_like(search));
        qb.push(" AND (");
        for (i, column) in ["first_name", "last_name", "username", "email"].iter().enumerate() {
            if i > 0 {
                qb.push(" OR ");
            }
            qb.push(*column)
                .push(" ILIKE ")
                .push_bind(pattern.clone())
                .push(" ESCAPE '\\'");
        }
        qb.push(")");
    }
    if let Some(role) = filter.role {
        qb.push(" AND role = ").push_bind(role);
    }
    if let Some(active) = filter.is_active {
        qb.push(" AND is_active = ").push_bind(active);
    }
}

#[async_trait]
impl UserRepo for PgUserRepo {
    async fn create(&self, new: NewUser) -> AppResult<User> {
        let sql = format!(
            r#"
            INSERT INTO users (username, email, password_hash, first_name, last_name, role)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {USER_COLUMNS}
            "#
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(&new.username)
            .bind(new.email.to_lowercase())
            .bind(&new.password_hash)
            .bind(&new.first_name)
            .bind(&new.last_name)
            .bind(new.role)
            .fetch_one(&self.db)
            .await
            .map_err(map_unique)
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?)
    }

    async fn find_by_username(&self, username: &str) -> AppResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1");
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(username)
            .fetch_optional(&self.db)
            .await?)
    }

    async fn find_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = lower($1)");
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(email)
            .fetch_optional(&self.db)
            .await?)
    }

    async fn find_by_identifier(&self, identifier: &str) -> AppResult<Option<User>> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1 OR email = lower($1) LIMIT 1"
        );
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(identifier)
            .fetch_optional(&self.db)
            .await?)
    }

    async fn update_profile(&self, id: Uuid, changes: ProfileChanges) -> AppResult<Option<User>> {
        let sql = format!(
            r#"
            UPDATE users
               SET first_name = COALESCE($2, first_name),
                   last_name  = COALESCE($3, last_name),
                   email      = COALESCE(lower($4), email),
                   updated_at = now()
             WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .bind(changes.first_name)
            .bind(changes.last_name)
            .bind(changes.email)
            .fetch_optional(&self.db)
            .await
            .map_err(map_unique)
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> AppResult<bool> {
        let res = sqlx::query(
            "UPDATE users SET password_hash = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(password_hash)
        .execute(&self.db)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn set_status(&self, id: Uuid, is_active: bool) -> AppResult<Option<User>> {
        let sql = format!(
            "UPDATE users SET is_active = $2, updated_at = now() WHERE id = $1 RETURNING {USER_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .bind(is_active)
            .fetch_optional(&self.db)
            .await?)
    }

    async fn set_role(&self, id: Uuid, role: Role) -> AppResult<Option<User>> {
        let sql = format!(
            "UPDATE users SET role = $2, updated_at = now() WHERE id = $1 RETURNING {USER_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .bind(role)
            .fetch_optional(&self.db)
            .await?)
    }

    async fn set_profile_picture(
        &self,
        id: Uuid,
        picture: Option<&str>,
    ) -> AppResult<Option<User>> {
        let sql = format!(
            "UPDATE users SET profile_picture = $2, updated_at = now() WHERE id = $1 RETURNING {USER_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .bind(picture)
            .fetch_optional(&self.db)
            .await?)
    }

    async fn delete(&self, id: Uuid) -> AppResult<bool> {
        let res = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn list(
        &self,
        filter: &UserFilter,
        limit: i64,
        offset: i64,
    ) -> AppResult<(Vec<User>, i64)> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM users");
        push_filter(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&self.db).await?;

        let mut rows = QueryBuilder::<Postgres>::new(format!("SELECT {USER_COLUMNS} FROM users"));
        push_filter(&mut rows, filter);
        rows.push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);
        let users = rows.build_query_as::<User>().fetch_all(&self.db).await?;

        Ok((users, total))
    }

    async fn stats(&self, recent_since: OffsetDateTime) -> AppResult<UserStats> {
        let (total, active, admins, recent) = sqlx::query_as::<_, (i64, i64, i64, i64)>(
            r#"
            SELECT COUNT(*),
                   COUNT(*) FILTER (WHERE is_active),
                   COUNT(*) FILTER (WHERE role = 'admin'),
                   COUNT(*) FILTER (WHERE created_at >= $1)
              FROM users
            "#,
        )
        .bind(recent_since)
        .fetch_one(&self.db)
        .await?;

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
