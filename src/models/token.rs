//! Token creation requests, one variant per token type.
//!
//! The backend accepts a single JSON shape keyed by `token_type`; each variant
//! carries exactly the extra fields that type needs. Unknown token types fail
//! to deserialize.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::AppError;

const MAX_MEMO_LEN: usize = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "token_type", rename_all = "snake_case")]
pub enum TokenKind {
    /// Web bug: a URL that alerts when fetched.
    Web,
    Dns,
    FastRedirect { redirect_url: String },
    SlowRedirect { redirect_url: String },
    ClonedWeb {
        clonedsite: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expected_referrer: Option<String>,
    },
    AwsKeys,
    AwsInfra {
        aws_account_number: String,
        aws_region: String,
    },
    AzureId,
    MsWord,
    MsExcel,
    AdobePdf,
    QrCode,
    WindowsDir,
    Cmd { cmd_process: String },
    Kubeconfig,
    Wireguard,
    SlackApi,
    Log4shell,
    Svn,
    #[serde(rename = "my_sql")]
    MySql,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Web => "web",
            TokenKind::Dns => "dns",
            TokenKind::FastRedirect { .. } => "fast_redirect",
            TokenKind::SlowRedirect { .. } => "slow_redirect",
            TokenKind::ClonedWeb { .. } => "cloned_web",
            TokenKind::AwsKeys => "aws_keys",
            TokenKind::AwsInfra { .. } => "aws_infra",
            TokenKind::AzureId => "azure_id",
            TokenKind::MsWord => "ms_word",
            TokenKind::MsExcel => "ms_excel",
            TokenKind::AdobePdf => "adobe_pdf",
            TokenKind::QrCode => "qr_code",
            TokenKind::WindowsDir => "windows_dir",
            TokenKind::Cmd { .. } => "cmd",
            TokenKind::Kubeconfig => "kubeconfig",
            TokenKind::Wireguard => "wireguard",
            TokenKind::SlackApi => "slack_api",
            TokenKind::Log4shell => "log4shell",
            TokenKind::Svn => "svn",
            TokenKind::MySql => "my_sql",
        }
    }

    /// Name shown in listings and history.
    pub fn label(&self) -> &'static str {
        match self {
            TokenKind::Web => "Web bug",
            TokenKind::Dns => "DNS",
            TokenKind::FastRedirect { .. } => "Fast redirect",
            TokenKind::SlowRedirect { .. } => "Slow redirect",
            TokenKind::ClonedWeb { .. } => "Cloned website",
            TokenKind::AwsKeys => "AWS API keys",
            TokenKind::AwsInfra { .. } => "AWS Infra",
            TokenKind::AzureId => "Azure login certificate",
            TokenKind::MsWord => "MS Word",
            TokenKind::MsExcel => "MS Excel",
            TokenKind::AdobePdf => "Acrobat Reader PDF",
            TokenKind::QrCode => "QR code",
            TokenKind::WindowsDir => "Windows folder",
            TokenKind::Cmd { .. } => "Sensitive command",
            TokenKind::Kubeconfig => "Kubeconfig",
            TokenKind::Wireguard => "WireGuard VPN",
            TokenKind::SlackApi => "Slack API key",
            TokenKind::Log4shell => "Log4Shell",
            TokenKind::Svn => "SVN",
            TokenKind::MySql => "MySQL dump",
        }
    }

    fn validate(&self) -> Result<(), AppError> {
        match self {
            TokenKind::FastRedirect { redirect_url } | TokenKind::SlowRedirect { redirect_url } => {
                require_http_url("redirect_url", redirect_url)
            }
            TokenKind::ClonedWeb { clonedsite, .. } => {
                if clonedsite.trim().is_empty() {
                    return Err(AppError::Validation("clonedsite is required".into()));
                }
                Ok(())
            }
            TokenKind::AwsInfra { aws_account_number, aws_region } => {
                if aws_account_number.len() != 12
                    || !aws_account_number.chars().all(|c| c.is_ascii_digit())
                {
                    return Err(AppError::Validation(
                        "aws_account_number must be 12 digits".into(),
                    ));
                }
                if aws_region.trim().is_empty() {
                    return Err(AppError::Validation("aws_region is required".into()));
                }
                Ok(())
            }
            TokenKind::Cmd { cmd_process } => {
                if !cmd_process.to_lowercase().ends_with(".exe") {
                    return Err(AppError::Validation(
                        "cmd_process must name an .exe file".into(),
                    ));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Body of `POST /api/generate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRequest {
    #[serde(flatten)]
    pub kind: TokenKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    pub memo: String,
}

impl TokenRequest {
    pub fn new(kind: TokenKind, memo: impl Into<String>) -> Self {
        Self {
            kind,
            email: None,
            webhook_url: None,
            memo: memo.into(),
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_webhook(mut self, url: impl Into<String>) -> Self {
        self.webhook_url = Some(url.into());
        self
    }

    /// Check the request the way the creation form does before submitting.
    pub fn validate(&self) -> Result<(), AppError> {
        let memo = self.memo.trim();
        if memo.is_empty() {
            return Err(AppError::Validation(
                "a memo is required to remind you where the token was placed".into(),
            ));
        }
        if memo.chars().count() > MAX_MEMO_LEN {
            return Err(AppError::Validation(format!(
                "memo must be at most {} characters",
                MAX_MEMO_LEN
            )));
        }

        let email = self.email.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let webhook = self.webhook_url.as_deref().map(str::trim).filter(|s| !s.is_empty());
        if email.is_none() && webhook.is_none() {
            return Err(AppError::Validation(
                "an email address or a webhook URL is required".into(),
            ));
        }
        if let Some(email) = email {
            if !looks_like_email(email) {
                return Err(AppError::Validation(format!("invalid email address: {}", email)));
            }
        }
        if let Some(webhook) = webhook {
            require_http_url("webhook_url", webhook)?;
        }

        self.kind.validate()
    }
}

/// Successful `POST /api/generate` reply. Type-specific fields land in `extra`.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateResponse {
    pub token: String,
    pub auth_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub token_url: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn looks_like_email(s: &str) -> bool {
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !s.chars().any(char::is_whitespace)
}

fn require_http_url(field: &str, raw: &str) -> Result<(), AppError> {
    match url::Url::parse(raw) {
        Ok(u) if matches!(u.scheme(), "http" | "https") && u.host().is_some() => Ok(()),
        _ => Err(AppError::Validation(format!("{} must be an http(s) URL", field))),
    }
}
