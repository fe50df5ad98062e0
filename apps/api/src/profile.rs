//! Candidate profile loading.
//!
//! The profile is a JSON document (JSON Resume shaped) read from disk on
//! demand. Callers that need it once per batch share a single load through
//! `actions::SharedProfile`; the pipeline driver falls back to `{}` when it
//! cannot be read.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::warn;

use crate::errors::AppError;

#[async_trait]
pub trait ProfileLoader: Send + Sync {
    async fn load(&self) -> Result<Value, AppError>;
}

pub struct FileProfileLoader {
    path: PathBuf,
}

impl FileProfileLoader {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl ProfileLoader for FileProfileLoader {
    async fn load(&self) -> Result<Value, AppError> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                AppError::NotFound(format!("Profile not found at {}", self.path.display()))
            }
            _ => AppError::Internal(anyhow::anyhow!(
                "failed to read profile {}: {e}",
                self.path.display()
            )),
        })?;

        serde_json::from_str(&raw).map_err(|e| {
            AppError::invalid_with("Profile is not valid JSON", json!({ "reason": e.to_string() }))
        })
    }
}

/// Loads the profile, substituting an empty object on any failure.
pub async fn load_profile_or_empty(loader: &dyn ProfileLoader) -> Value {
    match loader.load().await {
        Ok(profile) => profile,
        Err(err) => {
            warn!(error = %err, "Failed to load profile for scoring, using empty profile");
            json!({})
        }
    }
}
