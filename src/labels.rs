//! Display labels for backend field names.
//!
//! Keys with an entry in the override table use it verbatim; every other key
//! has underscores replaced by spaces and its first letter capitalised.

const OVERRIDES: &[(&str, &str)] = &[
    ("time_of_hit", "Date and Time"),
    ("src_ip", "Source IP"),
    ("src_data", "Source Data"),
    ("geo_info", "Geo Info"),
    ("useragent", "User Agent"),
    ("user_agent", "User Agent"),
    ("referer", "Referer"),
    ("referrer", "Referrer"),
    ("is_tor_relay", "Tor Exit Node"),
    ("input_channel", "Input Channel"),
    ("org", "Organisation"),
    ("hostname", "Hostname"),
    ("ip", "IP"),
    ("loc", "Location"),
    ("aws_keys", "AWS Keys"),
    ("aws_access_key_id", "AWS Access Key ID"),
    ("aws_secret_access_key", "AWS Secret Access Key"),
    ("aws_account_number", "AWS Account Number"),
    ("aws_region", "AWS Region"),
    ("aws_infra", "AWS Infra"),
    ("dns", "DNS"),
    ("http", "HTTP"),
    ("smtp", "SMTP"),
    ("sql_server", "SQL Server"),
    ("my_sql", "MySQL"),
    ("qr_code", "QR Code"),
    ("ms_word", "MS Word"),
    ("ms_excel", "MS Excel"),
    ("adobe_pdf", "Adobe PDF"),
    ("svn", "SVN"),
    ("kubeconfig", "Kubeconfig"),
    ("wireguard", "WireGuard"),
    ("cmd", "Sensitive Command"),
    ("off_inventory", "Excluded from alerting"),
    ("S3Bucket", "S3 Bucket"),
    ("SQSQueue", "SQS Queue"),
    ("SSMParameter", "SSM Parameter"),
    ("SecretsManagerSecret", "Secrets Manager Secret"),
    ("DynamoDBTable", "DynamoDB Table"),
];

/// Resolve the display label for `key`.
pub fn resolve_label(key: &str) -> String {
    if let Some((_, label)) = OVERRIDES.iter().find(|(k, _)| *k == key) {
        return (*label).to_string();
    }
    prettify(key)
}

fn prettify(key: &str) -> String {
    let spaced = key.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
