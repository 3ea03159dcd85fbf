pub mod assessment;
pub mod extraction;
pub mod generation;
pub mod lesson_content;
pub mod llm_provider;
pub mod progress;
pub mod prompts;
pub mod retry;
pub mod search_provider;
pub mod sessions;
pub mod syllabus;

use std::time::Duration;

use thiserror::Error;

use crate::db::StoreError;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("generation quota exhausted after {attempts} attempts")]
    QuotaExhausted { attempts: u32 },
    #[error("generation failed: {0}")]
    Generation(String),
    #[error(transparent)]
    Persistence(#[from] StoreError),
    #[error("operation cancelled")]
    Cancelled,
    #[error("operation timed out after {0:?}")]
    TimedOut(Duration),
}

impl ServiceError {
    pub fn validation(message: impl Into<String>) -> Self {
        ServiceError::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ServiceError::NotFound(message.into())
    }
}
