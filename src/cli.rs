use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Create and manage canarytokens from the terminal
#[derive(Parser)]
#[command(name = "canary", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the referrer-check edge service
    Edge {
        /// Port to bind (defaults to CANARY_EDGE_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Create and manage tokens
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },

    /// Onboard an AWS account for an AWS Infra token
    AwsInfra {
        #[command(subcommand)]
        command: AwsInfraCommands,
    },

    /// Print the display label for a field name
    Label { key: String },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum TokenTypeArg {
    Web,
    Dns,
    FastRedirect,
    SlowRedirect,
    ClonedWeb,
    AwsKeys,
    AwsInfra,
    AzureId,
    MsWord,
    MsExcel,
    AdobePdf,
    QrCode,
    WindowsDir,
    Cmd,
    Kubeconfig,
    Wireguard,
    SlackApi,
    Log4shell,
    Svn,
    MySql,
}

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Create a new token
    Create {
        #[arg(long = "type", value_enum)]
        token_type: TokenTypeArg,
        /// Reminder of where the token will be placed
        #[arg(long)]
        memo: String,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        webhook: Option<String>,
        /// Redirect target (fast/slow redirect tokens)
        #[arg(long)]
        redirect_url: Option<String>,
        /// Domain of the protected site (cloned website tokens)
        #[arg(long)]
        cloned_site: Option<String>,
        #[arg(long)]
        expected_referrer: Option<String>,
        /// Process name, e.g. klist.exe (sensitive command tokens)
        #[arg(long)]
        cmd_process: Option<String>,
        #[arg(long)]
        aws_account: Option<String>,
        #[arg(long, default_value = "us-east-1")]
        aws_region: String,
    },
    /// Show a token's configuration
    Manage {
        #[arg(long)]
        token: String,
        #[arg(long)]
        auth: String,
    },
    /// List a token's triggers
    History {
        #[arg(long)]
        token: String,
        #[arg(long)]
        auth: String,
    },
    /// Download a token artifact or its incident list
    Download {
        #[arg(long)]
        token: String,
        #[arg(long)]
        auth: String,
        /// e.g. awskeys, msword, pdf, incidentlist_csv
        #[arg(long)]
        fmt: String,
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
    /// Turn an alert setting on or off
    Settings {
        #[arg(long)]
        token: String,
        #[arg(long)]
        auth: String,
        /// email, webhook, browser_scanner, web_image, ip_ignore
        #[arg(long)]
        setting: String,
        #[arg(long, action = clap::ArgAction::Set)]
        enabled: bool,
    },
}

#[derive(Subcommand)]
pub enum AwsInfraCommands {
    /// Check the role, inventory the account and propose decoys
    Setup {
        #[arg(long)]
        token: String,
        #[arg(long)]
        auth: String,
        #[arg(long)]
        external_id: Option<String>,
        /// Ask the backend for generated S3 object / DynamoDB item names
        #[arg(long)]
        generate_names: bool,
        /// Save the proposed plan and set up ingestion
        #[arg(long)]
        save: bool,
    },
    /// Delete the token and print the Terraform snippet to remove decoys
    Teardown {
        #[arg(long)]
        token: String,
        #[arg(long)]
        auth: String,
    },
}
