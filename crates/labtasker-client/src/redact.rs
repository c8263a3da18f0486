//! Sensitive-text redaction for user-facing output.
//!
//! Two layers: explicitly registered secrets (the queue password, auth
//! headers) are replaced wherever they appear, and `password=...` /
//! `password: ...` patterns are masked even when the value was never
//! registered. Every error or traceback string goes through [`Redactor::redact`]
//! before reaching a terminal or log file.

use std::sync::{Arc, Mutex};

use regex::Regex;

const MASK: &str = "*****";

#[derive(Clone)]
pub struct Redactor {
    secrets: Arc<Mutex<Vec<String>>>,
    password_pattern: Regex,
}

impl Default for Redactor {
    fn default() -> Self {
        Self::new()
    }
}

impl Redactor {
    pub fn new() -> Self {
        Self {
            secrets: Arc::new(Mutex::new(Vec::new())),
            // password=value, password: value, PASSWORD="value"
            password_pattern: Regex::new(r#"(?i)(password['"]?\s*[=:]\s*)("[^"]*"|'[^']*'|\S+)"#)
                .expect("valid redaction regex"),
        }
    }

    /// Register a secret string to be masked wherever it appears.
    pub fn register(&self, secret: impl Into<String>) {
        let secret = secret.into();
        if secret.is_empty() {
            return;
        }
        self.secrets.lock().expect("redactor poisoned").push(secret);
    }

    pub fn redact(&self, text: &str) -> String {
        let mut out = self
            .password_pattern
            .replace_all(text, format!("${{1}}{}", MASK))
            .into_owned();
        for secret in self.secrets.lock().expect("redactor poisoned").iter() {
            out = out.replace(secret, MASK);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_assignments_are_masked() {
        let redactor = Redactor::new();
        assert_eq!(
            redactor.redact("error: password=supersecret rejected"),
            "error: password=***** rejected"
        );
        assert_eq!(redactor.redact("password: hunter2"), "password: *****");
        assert_eq!(redactor.redact("PASSWORD=\"p w\""), "PASSWORD=*****");
    }

    #[test]
    fn registered_secrets_are_masked_anywhere() {
        let redactor = Redactor::new();
        redactor.register("tok-abc123");
        assert_eq!(
            redactor.redact("Authorization failed for tok-abc123"),
            "Authorization failed for *****"
        );
    }

    #[test]
    fn benign_text_untouched() {
        let redactor = Redactor::new();
        assert_eq!(redactor.redact("all good"), "all good");
    }
}
