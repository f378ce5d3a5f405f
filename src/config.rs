use std::env;

use crate::error::AppError;

/// Endpoints and credentials for the managed backend.
#[derive(Clone, Debug)]
pub struct CloudConfig {
    pub api_base_url: String,
    pub storage_base_url: String,
    pub api_token: String,
    pub poll_interval_secs: u64,
}

impl CloudConfig {
    pub fn new_from_env() -> Result<Self, AppError> {
        let api_base_url = env::var("TODO_API_URL")
            .map_err(|_| AppError::Config("TODO_API_URL is not set".to_string()))?;
        let storage_base_url = env::var("TODO_STORAGE_URL")
            .map_err(|_| AppError::Config("TODO_STORAGE_URL is not set".to_string()))?;
        let api_token = env::var("TODO_API_TOKEN")
            .map_err(|_| AppError::Config("TODO_API_TOKEN is not set".to_string()))?;
        let poll_interval_secs = env::var("TODO_POLL_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(5);

        Ok(Self {
            api_base_url,
            storage_base_url,
            api_token,
            poll_interval_secs,
        })
    }
}
