use super::{Entity, BORROWING_VIEW_SELECT};
use crate::{
    error::{is_unique_violation, AppError},
    input::{normalize_email, ProfileData, RegisterData, StaffData},
    models::{BorrowingView, Profile, Reservation, Review, Staff, User},
    password::{hash_password, verify_password},
    role::Role,
};
use base64::Engine;
use rand::Rng;
use tracing::info;

fn new_token() -> String {
    let mut buf = [0u8; 32];
    rand::rngs::OsRng.fill(&mut buf);
    base64::engine::general_purpose::STANDARD.encode(buf)
}

fn email_conflict(err: sqlx::Error) -> AppError {
    if is_unique_violation(&err) {
        AppError::DuplicateEmail
    } else {
        AppError::Database(err)
    }
}

impl Entity {
    pub async fn user_create(&self, data: &RegisterData) -> Result<User, AppError> {
        let password_hash = hash_password(&data.password).await?;
        let mut tx = self.pool.begin().await?;

        let user: User = sqlx::query_as(
            "INSERT INTO users (email, password_hash, first_name, last_name, role)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *",
        )
        .bind(normalize_email(&data.email))
        .bind(password_hash)
        .bind(data.first_name.trim())
        .bind(data.last_name.trim())
        .bind(data.role)
        .fetch_one(&mut tx)
        .await
        .map_err(email_conflict)?;

        if user.role == Role::Author {
            sqlx::query(
                "INSERT INTO authors (user_id, first_name, last_name, bio) VALUES ($1, $2, $3, $4)",
            )
            .bind(user.id)
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(data.bio.as_deref())
            .execute(&mut tx)
            .await?;
        }

        tx.commit().await?;
        info!(user_id = user.id, role = ?user.role, "user registered");
        Ok(user)
    }

    pub async fn user_login(&self, email: &str, password: &str) -> Result<String, AppError> {
        let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = $1")
            .bind(normalize_email(email))
            .fetch_optional(&self.pool)
            .await?;

        let Some(user) = user else {
            return Err(AppError::InvalidCredentials);
        };
        if !verify_password(password, &user.password_hash).await? {
            return Err(AppError::InvalidCredentials);
        }

        let token = new_token();
        sqlx::query("INSERT INTO sessions (token, user_id) VALUES ($1, $2)")
            .bind(&token)
            .bind(user.id)
            .execute(&self.pool)
            .await?;

        Ok(token)
    }

    pub async fn user_logout(&self, token: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM sessions WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn user_get(&self, token: &str) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as(
            "SELECT u.* FROM sessions s JOIN users u ON u.id = s.user_id WHERE s.token = $1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    pub async fn profile(&self, user: User) -> Result<Profile, AppError> {
        let borrowings: Vec<BorrowingView> = sqlx::query_as(&format!(
            "{BORROWING_VIEW_SELECT} WHERE br.user_id = $1 ORDER BY br.borrow_date DESC, br.id DESC"
        ))
        .bind(user.id)
        .fetch_all(&self.pool)
        .await?;

        let reservations: Vec<Reservation> = sqlx::query_as(
            "SELECT * FROM reservations WHERE user_id = $1 AND NOT fulfilled ORDER BY reserved_for",
        )
        .bind(user.id)
        .fetch_all(&self.pool)
        .await?;

        let reviews: Vec<Review> =
            sqlx::query_as("SELECT * FROM reviews WHERE user_id = $1 ORDER BY created_at DESC")
                .bind(user.id)
                .fetch_all(&self.pool)
                .await?;

        let (past_borrows, borrowed): (Vec<_>, Vec<_>) =
            borrowings.into_iter().partition(|b| b.returned);

        Ok(Profile {
            user,
            borrowed,
            past_borrows,
            reservations,
            reviews,
        })
    }

    pub async fn profile_update(&self, user_id: i64, data: &ProfileData) -> Result<User, AppError> {
        let user = sqlx::query_as(
            "UPDATE users SET email = $2, first_name = $3, last_name = $4
            WHERE id = $1
            RETURNING *",
        )
        .bind(user_id)
        .bind(normalize_email(&data.email))
        .bind(data.first_name.trim())
        .bind(data.last_name.trim())
        .fetch_one(&self.pool)
        .await
        .map_err(email_conflict)?;
        Ok(user)
    }

    pub async fn staff_create(&self, data: &StaffData) -> Result<Staff, AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query_scalar::<_, i64>("UPDATE users SET role = $2 WHERE id = $1 RETURNING id")
            .bind(data.user_id)
            .bind(Role::Admin)
            .fetch_optional(&mut tx)
            .await?
            .ok_or(AppError::NotFound("user"))?;

        let staff: Staff = sqlx::query_as(
            "INSERT INTO staff (user_id, phone, position)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id) DO UPDATE
                SET phone = EXCLUDED.phone, position = EXCLUDED.position, status = 'ACTIVE'
            RETURNING *",
        )
        .bind(data.user_id)
        .bind(data.phone.trim())
        .bind(data.position.trim())
        .fetch_one(&mut tx)
        .await?;

        tx.commit().await?;
        info!(user_id = data.user_id, "staff profile saved");
        Ok(staff)
    }

    /// Inserts any missing group. Returns how many were created.
    pub async fn group_seed(&self, names: &[&str]) -> Result<u64, AppError> {
        let mut created = 0;
        for name in names {
            created +=
                sqlx::query("INSERT INTO groups (name) VALUES ($1) ON CONFLICT (name) DO NOTHING")
                    .bind(*name)
                    .execute(&self.pool)
                    .await?
                    .rows_affected();
        }
        Ok(created)
    }

    /// Creates an administrator unless the email is already taken. Returns whether one was created.
    pub async fn admin_seed(&self, email: &str, password: &str) -> Result<bool, AppError> {
        let password_hash = hash_password(password).await?;
        let created = sqlx::query(
            "INSERT INTO users (email, password_hash, first_name, last_name, role)
            VALUES ($1, $2, 'Library', 'Administrator', $3)
            ON CONFLICT (email) DO NOTHING",
        )
        .bind(normalize_email(email))
        .bind(password_hash)
        .bind(Role::Admin)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(created > 0)
    }
}

#[cfg(test)]
mod test {
    use super::new_token;
    use base64::Engine;

    #[test]
    fn tokens_are_random_32_bytes() {
        let a = new_token();
        let b = new_token();
        assert_ne!(a, b);
        let raw = base64::engine::general_purpose::STANDARD.decode(a).unwrap();
        assert_eq!(raw.len(), 32);
    }
}
