use std::net::SocketAddr;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use canary_console::awsinfra::{AssetType, AwsInfraSession, GenerationOutcome, Plan, Workflow};
use canary_console::backend::BackendClient;
use canary_console::config::{self, Config};
use canary_console::edge::edge_router;
use canary_console::labels::resolve_label;
use canary_console::models::canarydrop::{DownloadFormat, Setting};
use canary_console::models::token::{TokenKind, TokenRequest};

mod cli;

use cli::{AwsInfraCommands, Commands, TokenCommands, TokenTypeArg};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    // OTLP export only when a collector is configured.
    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "canary-console"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .context("failed to install OpenTelemetry tracer")?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "canary_console=debug,canary=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(telemetry_layer)
        .init();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Commands::Edge { port } => run_edge(&cfg, port).await,
        Commands::Token { command } => {
            let client = BackendClient::new(&cfg)?;
            handle_token_command(&client, command).await
        }
        Commands::AwsInfra { command } => {
            let client = BackendClient::new(&cfg)?;
            handle_aws_infra_command(client, command).await
        }
        Commands::Label { key } => {
            println!("{}", resolve_label(&key));
            Ok(())
        }
    };

    if let Err(e) = &result {
        eprintln!("Error: {:?}", e);
    }
    result
}

async fn run_edge(cfg: &Config, port: Option<u16>) -> anyhow::Result<()> {
    let port = port.unwrap_or(cfg.edge_port);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = edge_router(cfg.token_server.clone());

    tracing::info!(%addr, token_server = %cfg.token_server, "edge listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down edge");
        })
        .await?;
    Ok(())
}

fn token_kind(args: TokenArgs) -> anyhow::Result<TokenKind> {
    fn need(value: Option<String>, flag: &str) -> anyhow::Result<String> {
        value.ok_or_else(|| anyhow::anyhow!("{} is required for this token type", flag))
    }

    Ok(match args.token_type {
        TokenTypeArg::Web => TokenKind::Web,
        TokenTypeArg::Dns => TokenKind::Dns,
        TokenTypeArg::FastRedirect => TokenKind::FastRedirect {
            redirect_url: need(args.redirect_url, "--redirect-url")?,
        },
        TokenTypeArg::SlowRedirect => TokenKind::SlowRedirect {
            redirect_url: need(args.redirect_url, "--redirect-url")?,
        },
        TokenTypeArg::ClonedWeb => TokenKind::ClonedWeb {
            clonedsite: need(args.cloned_site, "--cloned-site")?,
            expected_referrer: args.expected_referrer,
        },
        TokenTypeArg::AwsKeys => TokenKind::AwsKeys,
        TokenTypeArg::AwsInfra => TokenKind::AwsInfra {
            aws_account_number: need(args.aws_account, "--aws-account")?,
            aws_region: args.aws_region,
        },
        TokenTypeArg::AzureId => TokenKind::AzureId,
        TokenTypeArg::MsWord => TokenKind::MsWord,
        TokenTypeArg::MsExcel => TokenKind::MsExcel,
        TokenTypeArg::AdobePdf => TokenKind::AdobePdf,
        TokenTypeArg::QrCode => TokenKind::QrCode,
        TokenTypeArg::WindowsDir => TokenKind::WindowsDir,
        TokenTypeArg::Cmd => TokenKind::Cmd {
            cmd_process: need(args.cmd_process, "--cmd-process")?,
        },
        TokenTypeArg::Kubeconfig => TokenKind::Kubeconfig,
        TokenTypeArg::Wireguard => TokenKind::Wireguard,
        TokenTypeArg::SlackApi => TokenKind::SlackApi,
        TokenTypeArg::Log4shell => TokenKind::Log4shell,
        TokenTypeArg::Svn => TokenKind::Svn,
        TokenTypeArg::MySql => TokenKind::MySql,
    })
}

/// Variant-specific flags of `token create`.
struct TokenArgs {
    token_type: TokenTypeArg,
    redirect_url: Option<String>,
    cloned_site: Option<String>,
    expected_referrer: Option<String>,
    cmd_process: Option<String>,
    aws_account: Option<String>,
    aws_region: String,
}

async fn handle_token_command(client: &BackendClient, cmd: TokenCommands) -> anyhow::Result<()> {
    match cmd {
        TokenCommands::Create {
            token_type,
            memo,
            email,
            webhook,
            redirect_url,
            cloned_site,
            expected_referrer,
            cmd_process,
            aws_account,
            aws_region,
        } => {
            let kind = token_kind(TokenArgs {
                token_type,
                redirect_url,
                cloned_site,
                expected_referrer,
                cmd_process,
                aws_account,
                aws_region,
            })?;
            let label = kind.label();
            let mut req = TokenRequest::new(kind, memo);
            if let Some(email) = email {
                req = req.with_email(email);
            }
            if let Some(url) = webhook {
                req = req.with_webhook(url);
            }

            let created = client.generate(&req).await?;
            println!("✅ {} token created", label);
            println!("   Token:      {}", created.token);
            println!("   Auth token: {}", created.auth_token);
            if let Some(url) = &created.token_url {
                println!("   URL:        {}", url);
            }
            if let Some(host) = &created.hostname {
                println!("   Hostname:   {}", host);
            }
            println!();
            println!("   Keep the auth token: it is needed to manage this token.");
        }
        TokenCommands::Manage { token, auth } => {
            let resp = client.manage(&token, &auth).await?;
            let drop = resp.canarydrop;
            println!("{:<28} {}", "Token", drop.canarytoken);
            println!("{:<28} {}", "Type", drop.type_of_token.as_deref().unwrap_or("-"));
            println!("{:<28} {}", "Memo", drop.memo);
            println!(
                "{:<28} {}",
                "Email alerts",
                on_off(drop.alert_email_enabled, drop.alert_email_recipient.as_deref())
            );
            println!(
                "{:<28} {}",
                "Webhook alerts",
                on_off(drop.alert_webhook_enabled, drop.alert_webhook_url.as_deref())
            );
            for (name, flag) in [
                ("Browser scanner", drop.browser_scanner_enabled),
                ("Web image", drop.web_image_enabled),
                ("Ignore IPs", drop.alert_ip_ignore_enabled),
            ] {
                if let Some(enabled) = flag {
                    println!("{:<28} {}", name, on_off(enabled, None));
                }
            }
        }
        TokenCommands::History { token, auth } => {
            let history = client.history(&token, &auth).await?;
            let hits = history.history.hits;
            if hits.is_empty() {
                println!("No alerts yet.");
                return Ok(());
            }
            println!("{} alert(s)", hits.len());
            for (i, hit) in hits.iter().enumerate() {
                println!();
                println!("#{}", i + 1);
                for (label, value) in hit.display_rows() {
                    println!("  {:<26} {}", label, value);
                }
            }
        }
        TokenCommands::Download {
            token,
            auth,
            fmt,
            out_dir,
        } => {
            let fmt: DownloadFormat = fmt.parse().map_err(anyhow::Error::msg)?;
            let path = client.download_to(&token, &auth, fmt, &out_dir).await?;
            println!("Saved {}", path.display());
        }
        TokenCommands::Settings {
            token,
            auth,
            setting,
            enabled,
        } => {
            let setting: Setting = setting.parse().map_err(anyhow::Error::msg)?;
            client.update_setting(&token, &auth, setting, enabled).await?;
            println!("{} is now {}", setting.as_str(), if enabled { "on" } else { "off" });
        }
    }
    Ok(())
}

fn on_off(enabled: bool, target: Option<&str>) -> String {
    match (enabled, target) {
        (true, Some(t)) if !t.is_empty() => format!("on ({})", t),
        (true, _) => "on".into(),
        (false, _) => "off".into(),
    }
}

async fn handle_aws_infra_command(
    client: BackendClient,
    cmd: AwsInfraCommands,
) -> anyhow::Result<()> {
    match cmd {
        AwsInfraCommands::Setup {
            token,
            auth,
            external_id,
            generate_names,
            save,
        } => {
            let session = AwsInfraSession::new(token, auth);
            let mut flow = Workflow::with_fixed_external_id(client, session, external_id);

            let cancel = flow.cancel_handle();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            });

            println!("Checking access to the inventory role...");
            flow.check_role().await.map_err(|e| anyhow::anyhow!(e.user_message()))?;
            println!("✅ Role assumed");

            println!("Inventorying the account...");
            let plan = flow.inventory().await.map_err(|e| anyhow::anyhow!(e.user_message()))?;
            print_plan(plan);

            if generate_names {
                let types: Vec<AssetType> =
                    AssetType::ALL.into_iter().filter(|t| t.supports_ai()).collect();
                match flow.generate_names(&types).await {
                    Ok(GenerationOutcome::Merged { updated }) => {
                        println!();
                        println!("Generated names for {} asset(s)", updated);
                        print_plan(flow.plan());
                    }
                    Ok(GenerationOutcome::QuotaExceeded) => {
                        if let Some(msg) = &flow.ai_quota().message {
                            println!("⚠️  {}", msg);
                        }
                    }
                    Ok(GenerationOutcome::NothingToGenerate) => {
                        println!("No S3 buckets or DynamoDB tables to name.");
                    }
                    Err(e) => println!("⚠️  {}", e.user_message()),
                }
                let quota = flow.ai_quota();
                if quota.total > 0 {
                    println!("   Generations left: {}/{}", quota.available, quota.total);
                }
            }

            if save {
                flow.save_plan().await.map_err(|e| anyhow::anyhow!(e.user_message()))?;
                println!("✅ Plan saved");
                flow.setup_ingestion()
                    .await
                    .map_err(|e| anyhow::anyhow!(e.user_message()))?;
                println!("✅ Alert ingestion set up");
            }
        }
        AwsInfraCommands::Teardown { token, auth } => {
            let session = AwsInfraSession::new(token, auth);
            let mut flow = Workflow::with_fixed_external_id(client, session, None);
            println!("Tearing down...");
            let snippet = flow.teardown().await.map_err(|e| anyhow::anyhow!(e.user_message()))?;
            println!("✅ Token deleted. Remove the decoys with:");
            println!();
            println!("{}", snippet);
        }
    }
    Ok(())
}

fn print_plan(plan: &Plan) {
    println!();
    println!("{:<28} {:<50} {}", "TYPE", "NAME", "CHILDREN");
    println!("{}", "-".repeat(90));
    for ty in plan.asset_types() {
        for asset in plan.assets(ty) {
            let children = asset
                .children
                .as_ref()
                .map(|c| c.len().to_string())
                .unwrap_or_else(|| "-".into());
            println!("{:<28} {:<50} {}", resolve_label(ty.as_str()), asset.name, children);
        }
    }
    println!("{} decoy(s) proposed", plan.len());
}
