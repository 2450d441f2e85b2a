use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Message shown when a long-running backend job exceeds its deadline.
pub const TIMEOUT_MESSAGE: &str =
    "The operation took too long. Please try again later.";

/// Message shown when the AI generation quota is used up.
pub const QUOTA_EXCEEDED_MESSAGE: &str =
    "You have reached the limit of AI generated names. You can still add names manually.";

#[derive(Debug, Error)]
pub enum AppError {
    #[error("network error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{message}")]
    Backend { status: u16, message: String },

    #[error("{}", TIMEOUT_MESSAGE)]
    Timeout,

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::InvalidResponse(e.to_string())
    }
}

impl AppError {
    /// Build a backend error from a response body, preferring `error` over `message`.
    pub fn from_body(status: u16, data: &serde_json::Value) -> Self {
        let message = body_message(data)
            .unwrap_or_else(|| format!("Request failed with status {}", status));
        AppError::Backend { status, message }
    }

    /// The string displayed to the user for this error.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Transport(e) => {
                tracing::warn!(error = %e, "backend unreachable");
                "Could not reach the server. Check your connection and try again.".to_string()
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:#}", e);
                "Something went wrong. Please try again.".to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Pull a human-readable message out of a backend JSON body.
pub fn body_message(data: &serde_json::Value) -> Option<String> {
    ["error", "message"].iter().find_map(|key| match data.get(*key) {
        Some(serde_json::Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(serde_json::Value::Null) | None => None,
        Some(v) => Some(v.to_string()),
    })
}

static ROLE_ARN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"arn:aws:iam::(\d{12}):role").expect("valid role ARN regex"));

static ACCOUNT_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{12})\b").expect("valid account id regex"));

/// Rewrite a role-assumption failure so it names the AWS account involved.
/// Messages that are not about assuming a role are returned unchanged.
pub fn remap_role_error(message: &str) -> String {
    let lower = message.to_lowercase();
    if !(lower.contains("assume") && lower.contains("role")) {
        return message.to_string();
    }

    let account = ROLE_ARN
        .captures(message)
        .or_else(|| ACCOUNT_ID.captures(message))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());

    match account {
        Some(account) => format!(
            "Could not assume the Canarytokens inventory role in AWS account {}. \
             Check that the role exists and that its trust policy includes the external ID.",
            account
        ),
        None => message.to_string(),
    }
}
