use lazy_static::lazy_static;
use regex::Regex;

use crate::error::AppError;

pub const NAME_MIN: usize = 3;
pub const NAME_MAX: usize = 20;
pub const PASSWORD_MIN: usize = 8;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn normalize_name(name: &str) -> String {
    name.trim().to_string()
}

/// Accumulates field errors so a single response lists every problem.
#[derive(Debug, Default)]
pub struct Violations(Vec<String>);

impl Violations {
    pub fn name(&mut self, name: &str) -> &mut Self {
        let len = name.chars().count();
        if len == 0 {
            self.0.push("Please tell us your name!".into());
        } else if len < NAME_MIN {
            self.0.push(format!("Name must be at least {NAME_MIN} characters"));
        } else if len > NAME_MAX {
            self.0.push(format!("Name must be at most {NAME_MAX} characters"));
        }
        self
    }

    pub fn email(&mut self, email: &str) -> &mut Self {
        if email.is_empty() {
            self.0.push("Please provide your email".into());
        } else if !is_valid_email(email) {
            self.0.push("Please provide a valid email".into());
        }
        self
    }

    pub fn password(&mut self, password: &str, confirm: &str) -> &mut Self {
        if password.is_empty() {
            self.0.push("Please provide a password".into());
        } else if password.chars().count() < PASSWORD_MIN {
            self.0.push(format!(
                "Password must be at least {PASSWORD_MIN} characters"
            ));
        }
        if confirm.is_empty() {
            self.0.push("Please confirm your password".into());
        } else if password != confirm {
            self.0.push("Passwords are not the same!".into());
        }
        self
    }

    pub fn finish(&mut self) -> Result<(), AppError> {
        if self.0.is_empty() {
            return Ok(());
        }
        Err(AppError::Validation(format!(
            "Invalid input data. {}",
            self.0.join(". ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_shape() {
        assert!(is_valid_email("a@x.com"));
        assert!(is_valid_email("name.surname@example.co"));
        assert!(!is_valid_email("no-at-sign.com"));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("a b@x.com"));
    }

    #[test]
    fn normalization() {
        assert_eq!(normalize_email("  Alice@Example.COM "), "alice@example.com");
        assert_eq!(normalize_name("  alice "), "alice");
    }

    #[test]
    fn name_bounds() {
        assert!(Violations::default().name("al").finish().is_err());
        assert!(Violations::default().name("alice").finish().is_ok());
        assert!(Violations::default().name(&"a".repeat(20)).finish().is_ok());
        assert!(Violations::default().name(&"a".repeat(21)).finish().is_err());
    }

    #[test]
    fn password_mismatch_is_reported() {
        let err = Violations::default()
            .password("secret123", "secret124")
            .finish()
            .unwrap_err();
        assert!(err.to_string().contains("Passwords are not the same!"));
    }

    #[test]
    fn collects_every_violation() {
        let err = Violations::default()
            .name("x")
            .email("nope")
            .password("short", "short")
            .finish()
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Name must be at least 3"));
        assert!(msg.contains("valid email"));
        assert!(msg.contains("at least 8"));
        assert!(matches!(err, AppError::Validation(_)));
    }
}
