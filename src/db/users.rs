//! Identity provisioning. The ceremony engine never writes identities; the
//! HTTP layer resolves (or creates) them here and passes them in.

use crate::db::models::Identity;
use crate::error::{AppError, AppResult};
use sqlx::SqlitePool;

pub async fn create_user(
    pool: &SqlitePool,
    username: &str,
    display_name: &str,
) -> AppResult<Identity> {
    let user = Identity::new(username.to_string(), display_name.to_string());

    sqlx::query(
        "INSERT INTO users (id, username, display_name, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&user.id)
    .bind(&user.username)
    .bind(&user.display_name)
    .bind(&user.created_at)
    .bind(&user.updated_at)
    .execute(pool)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => {
            AppError::BadRequest(format!("User '{}' already exists", username))
        }
        _ => AppError::Database(e),
    })?;

    Ok(user)
}

pub async fn find_by_username(pool: &SqlitePool, username: &str) -> AppResult<Identity> {
    let user = sqlx::query_as::<_, Identity>("SELECT * FROM users WHERE username = ?")
        .bind(username)
        .fetch_one(pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => AppError::NotFound(format!("User '{}' not found", username)),
            _ => AppError::Database(e),
        })?;

    Ok(user)
}

pub async fn find_by_id(pool: &SqlitePool, user_id: &str) -> AppResult<Identity> {
    let user = sqlx::query_as::<_, Identity>("SELECT * FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_one(pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => AppError::NotFound(format!("User with id '{}' not found", user_id)),
            _ => AppError::Database(e),
        })?;

    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    #[tokio::test]
    async fn test_create_and_lookup() {
        let pool = test_pool().await;

        let created = create_user(&pool, "alice", "Alice Smith").await.unwrap();
        let by_name = find_by_username(&pool, "alice").await.unwrap();
        let by_id = find_by_id(&pool, &created.id).await.unwrap();

        assert_eq!(created, by_name);
        assert_eq!(created, by_id);
    }

    #[tokio::test]
    async fn test_duplicate_username() {
        let pool = test_pool().await;
        create_user(&pool, "alice", "Alice").await.unwrap();

        let result = create_user(&pool, "alice", "Other Alice").await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_missing_user() {
        let pool = test_pool().await;
        let result = find_by_username(&pool, "nobody").await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }
}
