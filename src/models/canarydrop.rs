use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::labels::resolve_label;

/// The backend record for one issued token.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Canarydrop {
    #[serde(alias = "token")]
    pub canarytoken: String,
    #[serde(default)]
    pub memo: String,
    #[serde(default)]
    pub type_of_token: Option<String>,
    #[serde(default)]
    pub alert_email_enabled: bool,
    #[serde(default)]
    pub alert_email_recipient: Option<String>,
    #[serde(default)]
    pub alert_webhook_enabled: bool,
    #[serde(default)]
    pub alert_webhook_url: Option<String>,
    #[serde(default)]
    pub browser_scanner_enabled: Option<bool>,
    #[serde(default)]
    pub web_image_enabled: Option<bool>,
    #[serde(default)]
    pub alert_ip_ignore_enabled: Option<bool>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Reply of `GET /api/manage`.
#[derive(Debug, Clone, Deserialize)]
pub struct ManageResponse {
    pub canarydrop: Canarydrop,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Reply of `GET /api/history`.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenHistory {
    #[serde(default)]
    pub canarydrop: Option<Canarydrop>,
    #[serde(default)]
    pub history: History,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct History {
    #[serde(default)]
    pub hits: Vec<Hit>,
}

/// One trigger of a token.
#[derive(Debug, Clone, Deserialize)]
pub struct Hit {
    /// Seconds since the epoch, sometimes sent as a string.
    #[serde(deserialize_with = "de_epoch")]
    pub time_of_hit: f64,
    #[serde(default)]
    pub src_ip: Option<String>,
    #[serde(default)]
    pub input_channel: Option<String>,
    #[serde(default)]
    pub geo_info: Option<Value>,
    #[serde(default)]
    pub is_tor_relay: Option<bool>,
    #[serde(flatten)]
    pub additional: BTreeMap<String, Value>,
}

impl Hit {
    pub fn triggered_at(&self) -> Option<DateTime<Utc>> {
        let secs = self.time_of_hit.trunc() as i64;
        let nanos = ((self.time_of_hit.fract()) * 1e9) as u32;
        Utc.timestamp_opt(secs, nanos).single()
    }

    /// Labelled `(name, value)` rows for display, in a stable order.
    pub fn display_rows(&self) -> Vec<(String, String)> {
        let mut rows = Vec::new();
        if let Some(at) = self.triggered_at() {
            rows.push((
                resolve_label("time_of_hit"),
                at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            ));
        }
        if let Some(ip) = &self.src_ip {
            rows.push((resolve_label("src_ip"), ip.clone()));
        }
        if let Some(channel) = &self.input_channel {
            rows.push((resolve_label("input_channel"), channel.clone()));
        }
        if let Some(tor) = self.is_tor_relay {
            rows.push((resolve_label("is_tor_relay"), if tor { "Yes" } else { "No" }.into()));
        }
        if let Some(Value::Object(geo)) = &self.geo_info {
            for key in ["city", "region", "country", "org"] {
                if let Some(v) = geo.get(key).and_then(display_value) {
                    rows.push((resolve_label(key), v));
                }
            }
        }
        for (key, value) in &self.additional {
            if let Some(v) = display_value(value) {
                rows.push((resolve_label(key), v));
            }
        }
        rows
    }
}

/// Alert settings toggled through `POST /api/settings`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
    EmailEnable,
    WebhookEnable,
    BrowserScannerEnable,
    WebImageEnable,
    IpIgnoreEnable,
}

impl Setting {
    pub fn as_str(&self) -> &'static str {
        match self {
            Setting::EmailEnable => "email_enable",
            Setting::WebhookEnable => "webhook_enable",
            Setting::BrowserScannerEnable => "browser_scanner_enable",
            Setting::WebImageEnable => "web_image_enable",
            Setting::IpIgnoreEnable => "ip_ignore_enable",
        }
    }
}

impl std::str::FromStr for Setting {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email_enable" | "email" => Ok(Setting::EmailEnable),
            "webhook_enable" | "webhook" => Ok(Setting::WebhookEnable),
            "browser_scanner_enable" | "browser_scanner" => Ok(Setting::BrowserScannerEnable),
            "web_image_enable" | "web_image" => Ok(Setting::WebImageEnable),
            "ip_ignore_enable" | "ip_ignore" => Ok(Setting::IpIgnoreEnable),
            other => Err(format!("unknown setting: {}", other)),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SettingsRequest<'a> {
    pub token: &'a str,
    pub auth: &'a str,
    pub setting: &'static str,
    pub value: &'static str,
}

impl<'a> SettingsRequest<'a> {
    pub fn new(token: &'a str, auth: &'a str, setting: Setting, enabled: bool) -> Self {
        Self {
            token,
            auth,
            setting: setting.as_str(),
            value: if enabled { "on" } else { "off" },
        }
    }
}

/// Artifact formats served by `GET /api/download`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadFormat {
    AwsKeys,
    Kubeconfig,
    MsWord,
    MsExcel,
    Pdf,
    QrCode,
    Wireguard,
    IncidentListJson,
    IncidentListCsv,
}

impl DownloadFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadFormat::AwsKeys => "awskeys",
            DownloadFormat::Kubeconfig => "kubeconfig",
            DownloadFormat::MsWord => "msword",
            DownloadFormat::MsExcel => "msexcel",
            DownloadFormat::Pdf => "pdf",
            DownloadFormat::QrCode => "qrcode",
            DownloadFormat::Wireguard => "wireguard",
            DownloadFormat::IncidentListJson => "incidentlist_json",
            DownloadFormat::IncidentListCsv => "incidentlist_csv",
        }
    }
}

impl std::str::FromStr for DownloadFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            DownloadFormat::AwsKeys,
            DownloadFormat::Kubeconfig,
            DownloadFormat::MsWord,
            DownloadFormat::MsExcel,
            DownloadFormat::Pdf,
            DownloadFormat::QrCode,
            DownloadFormat::Wireguard,
            DownloadFormat::IncidentListJson,
            DownloadFormat::IncidentListCsv,
        ]
        .into_iter()
        .find(|f| f.as_str() == s)
        .ok_or_else(|| format!("unknown download format: {}", s))
    }
}

fn display_value(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(if *b { "Yes" } else { "No" }.to_string()),
        other => Some(other.to_string()),
    }
}

fn de_epoch<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Epoch {
        Num(f64),
        Str(String),
    }

    match Epoch::deserialize(deserializer)? {
        Epoch::Num(n) => Ok(n),
        Epoch::Str(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hit_epoch_accepts_string_and_number() {
        let a: Hit = serde_json::from_value(json!({"time_of_hit": "1700000000.5"})).unwrap();
        let b: Hit = serde_json::from_value(json!({"time_of_hit": 1700000000})).unwrap();
        assert_eq!(a.triggered_at().unwrap().timestamp(), 1_700_000_000);
        assert_eq!(b.triggered_at().unwrap().timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_hit_display_rows_use_labels() {
        let hit: Hit = serde_json::from_value(json!({
            "time_of_hit": 0,
            "src_ip": "203.0.113.7",
            "input_channel": "HTTP",
            "geo_info": {"city": "Cape Town", "country": "ZA"},
            "useragent": "curl/8.0",
        }))
        .unwrap();
        let rows = hit.display_rows();
        assert_eq!(rows[0], ("Date and Time".to_string(), "1970-01-01 00:00:00 UTC".to_string()));
        assert!(rows.contains(&("Source IP".to_string(), "203.0.113.7".to_string())));
        assert!(rows.contains(&("City".to_string(), "Cape Town".to_string())));
        assert!(rows.contains(&("User Agent".to_string(), "curl/8.0".to_string())));
    }

    #[test]
    fn test_settings_request_values() {
        let req = SettingsRequest::new("tok", "auth", Setting::WebhookEnable, false);
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["setting"], "webhook_enable");
        assert_eq!(v["value"], "off");
    }

    #[test]
    fn test_canarydrop_accepts_token_alias() {
        let drop: Canarydrop =
            serde_json::from_value(json!({"token": "abc", "memo": "m", "created_at": "x"})).unwrap();
        assert_eq!(drop.canarytoken, "abc");
        assert_eq!(drop.extra["created_at"], "x");
    }

    #[test]
    fn test_download_format_parse() {
        assert_eq!("incidentlist_csv".parse::<DownloadFormat>(), Ok(DownloadFormat::IncidentListCsv));
        assert!("exe".parse::<DownloadFormat>().is_err());
    }
}
