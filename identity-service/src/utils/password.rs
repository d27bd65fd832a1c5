use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use once_cell::sync::Lazy;

/// Newtype for password to prevent accidental logging
#[derive(Clone)]
pub struct Password(String);

impl Password {
    pub fn new(password: String) -> Self {
        Self(password)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Password(***)")
    }
}

/// Newtype for password hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordHashString(String);

impl PasswordHashString {
    pub fn new(hash: String) -> Self {
        Self(hash)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

/// Hash a password using Argon2
///
/// Uses Argon2id variant with secure default parameters.
/// Salt is automatically generated and included in the hash.
pub fn hash_password(password: &Password) -> Result<PasswordHashString, anyhow::Error> {
    let argon2 = Argon2::default();
    let salt = SaltString::generate(&mut OsRng);

    let password_hash = argon2
        .hash_password(password.as_str().as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?
        .to_string();

    Ok(PasswordHashString::new(password_hash))
}

/// Verify a password against a hash using constant-time comparison
pub fn verify_password(
    password: &Password,
    password_hash: &PasswordHashString,
) -> Result<(), anyhow::Error> {
    let parsed_hash = PasswordHash::new(password_hash.as_str())
        .map_err(|e| anyhow::anyhow!("Invalid password hash format: {}", e))?;

    Argon2::default()
        .verify_password(password.as_str().as_bytes(), &parsed_hash)
        .map_err(|_| anyhow::anyhow!("Password verification failed"))
}

/// Hash checked when the identifier matches no account, so that an unknown
/// identifier costs the same Argon2 work as a wrong password.
static DUMMY_HASH: Lazy<Option<PasswordHashString>> =
    Lazy::new(|| hash_password(&Password::new("dummy-password-for-timing".to_string())).ok());

/// Burns one Argon2 verification. The outcome is always a failure.
pub fn verify_dummy(password: &Password) {
    if let Some(hash) = DUMMY_HASH.as_ref() {
        let _ = verify_password(password, hash);
    }
}

const MIN_PASSWORD_LENGTH: usize = 8;

const WEAK_SUBSTRINGS: &[&str] = &["password", "123456", "qwerty", "12345678", "12345", "1234"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeakPasswordReason {
    TooShort,
    MissingUppercase,
    MissingLowercase,
    MissingDigit,
    MissingSymbol,
    CommonPattern,
}

impl std::fmt::Display for WeakPasswordReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            WeakPasswordReason::TooShort => "must be at least 8 characters",
            WeakPasswordReason::MissingUppercase => "must contain an uppercase letter",
            WeakPasswordReason::MissingLowercase => "must contain a lowercase letter",
            WeakPasswordReason::MissingDigit => "must contain a digit",
            WeakPasswordReason::MissingSymbol => "must contain a special character",
            WeakPasswordReason::CommonPattern => "contains a common pattern",
        };
        f.write_str(msg)
    }
}

pub fn password_strength(password: &Password) -> Result<(), WeakPasswordReason> {
    let p = password.as_str();

    if p.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(WeakPasswordReason::TooShort);
    }
    if !p.chars().any(char::is_uppercase) {
        return Err(WeakPasswordReason::MissingUppercase);
    }
    if !p.chars().any(char::is_lowercase) {
        return Err(WeakPasswordReason::MissingLowercase);
    }
    if !p.chars().any(|c| c.is_ascii_digit()) {
        return Err(WeakPasswordReason::MissingDigit);
    }
    if !p.chars().any(|c| !c.is_alphanumeric() && !c.is_whitespace()) {
        return Err(WeakPasswordReason::MissingSymbol);
    }

    let lower = p.to_lowercase();
    if WEAK_SUBSTRINGS.iter().any(|weak| lower.contains(weak)) {
        return Err(WeakPasswordReason::CommonPattern);
    }

    Ok(())
}
