// db/userdb.rs
use async_trait::async_trait;
use uuid::Uuid;

use super::db::DBClient;
use crate::models::usermodel::User;

#[async_trait]
pub trait UserExt {
    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, sqlx::Error>;
}

#[async_trait]
impl UserExt for DBClient {
    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT
                id,
                name,
                email,
                role,
                available_balance_cents,
                total_earnings_cents,
                created_at,
                updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
    }
}
