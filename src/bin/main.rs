use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use console_gate::auth::NewUser;
use console_gate::auth::signature::sign_request;
use console_gate::config::{generate_auth_secret, load_settings, resolve_config_path};
use console_gate::types::Username;
use console_gate::{
    ConfigSnapshot, ConfigStore, CredentialStore, MemoryCredentialStore, MemoryLoginLog,
    MemoryTaskControl, SignScheme, SigningConfig, build_state, serve,
};
use tracing::{Level, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "console-gate")]
#[command(about = "Authentication gate for the task console")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the console HTTP server
    Serve {
        #[arg(long, default_value = "0.0.0.0:5920")]
        bind: String,
        /// Settings file; a missing file means the console is not installed yet
        #[arg(long, env = "CONSOLE_GATE_CONFIG")]
        config: Option<PathBuf>,
        /// Admin account to create at startup (accounts are kept in memory)
        #[arg(long, env = "CONSOLE_GATE_ADMIN_USER")]
        admin_user: Option<String>,
        #[arg(long, env = "CONSOLE_GATE_ADMIN_PASSWORD", hide_env_values = true)]
        admin_password: Option<String>,
    },
    /// Print the `sign` parameter for a `/v1` request
    Sign {
        /// Route path, e.g. /v1/task/enable/5
        path: String,
        #[arg(long, env = "CONSOLE_GATE_API_KEY")]
        key: String,
        #[arg(long, env = "CONSOLE_GATE_API_SECRET", hide_env_values = true)]
        secret: String,
        #[arg(long, default_value = "md5", value_parser = parse_scheme)]
        scheme: SignScheme,
        /// Unix timestamp; defaults to now
        #[arg(long)]
        time: Option<i64>,
    },
    /// Print a fresh session secret
    GenSecret,
}

fn parse_scheme(raw: &str) -> Result<SignScheme, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "md5" => Ok(SignScheme::Md5),
        "sha256" => Ok(SignScheme::Sha256),
        other => Err(format!("unknown scheme `{}` (expected md5 or sha256)", other)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("console_gate=info".parse()?)
                .add_directive("tower_http=warn".parse()?),
        )
        .with_max_level(Level::INFO)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            bind,
            config,
            admin_user,
            admin_password,
        } => {
            let path = config.unwrap_or_else(resolve_config_path);
            let installed = path.exists();
            let snapshot = if installed {
                info!("Loading settings from {}", path.display());
                load_settings(&path)?
            } else {
                info!(
                    "No settings at {}; starting in install mode",
                    path.display()
                );
                ConfigSnapshot::new(generate_auth_secret())
            };
            let store = Arc::new(ConfigStore::with_path(snapshot, path));

            let credentials = Arc::new(MemoryCredentialStore::new());
            match (admin_user, admin_password) {
                (Some(user), Some(password)) => {
                    let identity = credentials
                        .create_user(NewUser {
                            username: Username::new(user.trim()),
                            email: String::new(),
                            password,
                            is_admin: true,
                        })
                        .await?;
                    info!("Seeded admin account `{}`", identity.username());
                }
                (Some(_), None) | (None, Some(_)) => {
                    return Err(anyhow!(
                        "--admin-user and --admin-password must be given together"
                    ));
                }
                (None, None) if installed => {
                    warn!("Installed console started without an admin account; nobody can log in");
                }
                (None, None) => {}
            }

            let state = build_state(
                store,
                installed,
                credentials,
                Arc::new(MemoryTaskControl::new()),
                Arc::new(MemoryLoginLog::new()),
            );
            serve(state, &bind).await?;
        }
        Commands::Sign {
            path,
            key,
            secret,
            scheme,
            time,
        } => {
            let time = time.unwrap_or_else(|| chrono::Utc::now().timestamp());
            let config = SigningConfig {
                api_key: key,
                api_secret: secret,
                sign_enabled: true,
                sign_scheme: scheme,
                fail_closed: false,
            };
            let sign = sign_request(&config, time, &path)
                .ok_or_else(|| anyhow!("API key and secret must not be empty"))?;
            println!("{}?time={}&sign={}", path.trim(), time, sign);
        }
        Commands::GenSecret => {
            println!("{}", generate_auth_secret());
        }
    }

    Ok(())
}
