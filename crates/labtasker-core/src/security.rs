//! Queue password hashing.
//!
//! bcrypt with a configurable work factor plus a server-side pepper mixed
//! into the password before hashing. The salt is handled by bcrypt itself.

use crate::error::ApiError;

#[derive(Clone)]
pub struct SecurityManager {
    pepper: String,
    cost: u32,
    min_password_length: usize,
}

impl SecurityManager {
    pub fn new(pepper: impl Into<String>, cost: u32, min_password_length: usize) -> Self {
        Self {
            pepper: pepper.into(),
            cost,
            min_password_length,
        }
    }

    fn peppered(&self, password: &str) -> String {
        if self.pepper.is_empty() {
            password.to_string()
        } else {
            format!("{}${}", self.pepper, password)
        }
    }

    pub fn hash_password(&self, password: &str) -> Result<String, ApiError> {
        if password.len() < self.min_password_length {
            return Err(ApiError::InvalidInput(format!(
                "Password must be at least {} characters long",
                self.min_password_length
            )));
        }
        bcrypt::hash(self.peppered(password), self.cost)
            .map_err(|e| ApiError::Internal(format!("Failed to hash password: {}", e)))
    }

    pub fn verify_password(&self, password: &str, hashed: &str) -> bool {
        bcrypt::verify(self.peppered(password), hashed).unwrap_or(false)
    }
}
