//! argon2 hashing, run on actix's blocking pool so workers keep serving requests.
use crate::error::AppError;
use actix_web::web;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

fn hash_blocking(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| AppError::Internal(format!("failed to hash password: {err}")))
}

fn verify_blocking(password: &str, password_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(password_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

pub async fn hash_password(password: &str) -> Result<String, AppError> {
    let password = password.to_string();
    web::block(move || hash_blocking(&password))
        .await
        .map_err(|err| AppError::Internal(format!("password hashing was cancelled: {err}")))?
}

pub async fn verify_password(password: &str, password_hash: &str) -> Result<bool, AppError> {
    let (password, password_hash) = (password.to_string(), password_hash.to_string());
    web::block(move || verify_blocking(&password, &password_hash))
        .await
        .map_err(|err| AppError::Internal(format!("password check was cancelled: {err}")))
}
