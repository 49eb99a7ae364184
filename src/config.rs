use std::path::PathBuf;

use anyhow::Context;
use serde::Deserialize;

pub const DEFAULT_MAX_FILE_SIZE: u64 = 5 * 1024 * 1024;
pub const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    pub dir: PathBuf,
    pub max_file_size: u64,
    pub allowed_types: Vec<String>,
}

impl UploadConfig {
    pub fn default_allowed_types() -> Vec<String> {
        ["image/jpeg", "image/jpg", "image/png", "image/gif", "application/pdf"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    pub fn is_allowed(&self, mime: &str) -> bool {
        self.allowed_types.iter().any(|t| t == mime)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt: JwtConfig,
    pub upload: UploadConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(get: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = get("DATABASE_URL").context("DATABASE_URL is not set")?;

        let secret = get("JWT_SECRET").context("JWT_SECRET is not set")?;
        anyhow::ensure!(
            secret.len() >= MIN_SECRET_LEN,
            "JWT_SECRET must be at least {} characters long",
            MIN_SECRET_LEN
        );

        let jwt = JwtConfig {
            secret,
            issuer: get("JWT_ISSUER").unwrap_or_else(|| "tms-backend".into()),
            audience: get("JWT_AUDIENCE").unwrap_or_else(|| "tms-users".into()),
            ttl_minutes: get("JWT_TTL_MINUTES")
                .and_then(|v| v.parse::<i64>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(60 * 24 * 7),
        };

        let allowed_types = get("ALLOWED_FILE_TYPES")
            .map(|raw| {
                raw.split(',')
                    .map(|t| t.trim().to_lowercase())
                    .filter(|t| !t.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|types| !types.is_empty())
            .unwrap_or_else(UploadConfig::default_allowed_types);

        let upload = UploadConfig {
            dir: get("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("uploads")),
            max_file_size: get("MAX_FILE_SIZE")
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(DEFAULT_MAX_FILE_SIZE),
            allowed_types,
        };

        Ok(Self {
            database_url,
            jwt,
            upload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_optional_vars_missing() {
        let cfg = AppConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "memory://"),
            ("JWT_SECRET", SECRET),
        ]))
        .expect("config");

        assert_eq!(cfg.jwt.ttl_minutes, 60 * 24 * 7);
        assert_eq!(cfg.jwt.issuer, "tms-backend");
        assert_eq!(cfg.upload.dir, PathBuf::from("uploads"));
        assert_eq!(cfg.upload.max_file_size, DEFAULT_MAX_FILE_SIZE);
        assert!(cfg.upload.is_allowed("image/png"));
        assert!(cfg.upload.is_allowed("application/pdf"));
        assert!(!cfg.upload.is_allowed("text/html"));
    }

    #[test]
    fn allowed_types_and_size_are_overridable() {
        let cfg = AppConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "memory://"),
            ("JWT_SECRET", SECRET),
            ("ALLOWED_FILE_TYPES", " image/webp , Image/PNG,,"),
            ("MAX_FILE_SIZE", "1024"),
            ("UPLOAD_DIR", "/tmp/up"),
        ]))
        .expect("config");

        assert_eq!(cfg.upload.allowed_types, vec!["image/webp", "image/png"]);
        assert_eq!(cfg.upload.max_file_size, 1024);
        assert_eq!(cfg.upload.dir, PathBuf::from("/tmp/up"));
    }

    #[test]
    fn short_secret_is_rejected() {
        let err = AppConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "memory://"),
            ("JWT_SECRET", "too-short"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("at least 32"));
    }

    #[test]
    fn missing_database_url_is_an_error() {
        let err = AppConfig::from_lookup(lookup(&[("JWT_SECRET", SECRET)])).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn garbage_numbers_fall_back_to_defaults() {
        let cfg = AppConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "memory://"),
            ("JWT_SECRET", SECRET),
            ("JWT_TTL_MINUTES", "soon"),
            ("MAX_FILE_SIZE", "-4"),
        ]))
        .expect("config");
        assert_eq!(cfg.jwt.ttl_minutes, 60 * 24 * 7);
        assert_eq!(cfg.upload.max_file_size, DEFAULT_MAX_FILE_SIZE);
    }
}
