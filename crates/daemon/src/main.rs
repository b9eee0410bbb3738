//! capfs daemon
//!
//! Multi-client file service with owner/group/other access control.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use daemon::client::FileClient;
use daemon::config::{default_config_path, Config};
use daemon::logging::init_logging;
use daemon::server::{FileServer, ServerEvent};

/// capfs daemon - multi-client file service with owner/group/other access control.
#[derive(Parser, Debug)]
#[command(name = "capfs-daemon")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for the daemon.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the file server until SIGINT or SIGTERM
    Start {
        /// Override the listen port
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Log in and run a single command against a running server
    Exec {
        /// Server address
        #[arg(long, default_value = "127.0.0.1:8888")]
        addr: String,

        /// User to log in as
        #[arg(long, short)]
        user: String,

        /// Group to log in as
        #[arg(long, short)]
        group: String,

        /// Give up after this many seconds (default: wait indefinitely)
        #[arg(long)]
        timeout: Option<u64>,

        /// Command words, e.g. `create f1 rwrnnn`
        #[arg(required = true, num_args = 1.., trailing_var_arg = true)]
        command: Vec<String>,
    },

    /// Print the effective configuration as TOML
    Config {
        /// Also write it to the configuration file
        #[arg(long)]
        save: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let mut config = Config::load(&config_path)?;
    config.apply_env_overrides();
    if let Commands::Start { port: Some(port) } = cli.command {
        config.server.port = port;
    }
    config.validate()?;

    let _logging = init_logging(&config.daemon, cli.verbose)?;
    tracing::debug!(config = %config_path.display(), "Configuration loaded");

    match cli.command {
        Commands::Start { .. } => {
            tracing::info!("capfs daemon starting...");
            let mut server = FileServer::new(config)?;
            run_server(&mut server).await?;
        }
        Commands::Exec {
            addr,
            user,
            group,
            timeout,
            command,
        } => {
            let ok = run_exec(&addr, &user, &group, timeout, &command.join(" ")).await?;
            if !ok {
                std::process::exit(1);
            }
        }
        Commands::Config { save } => {
            print!("{}", config.to_toml()?);
            if save {
                config.save(&config_path)?;
                eprintln!("Configuration written to {}", config_path.display());
            }
        }
    }

    Ok(())
}

/// Run the server until a shutdown signal arrives.
async fn run_server(server: &mut FileServer) -> anyhow::Result<()> {
    let addr = server.start().await?;
    println!("capfs listening on {}", addr);

    let mut events = server.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ServerEvent::StateChanged(state) => {
                    tracing::debug!("Server state: {:?}", state);
                }
                ServerEvent::SessionOpened { session_id, peer } => {
                    tracing::debug!(%session_id, %peer, "Session opened");
                }
                ServerEvent::SessionClosed { session_id, reason } => {
                    tracing::debug!(%session_id, %reason, "Session closed");
                }
                ServerEvent::Error { message } => {
                    tracing::error!("Server error: {}", message);
                }
            }
        }
    });

    wait_for_shutdown_signal().await?;
    tracing::info!("Received shutdown signal");

    server.stop().await?;
    Ok(())
}

/// Run one command as `user`/`group`; returns whether it succeeded.
async fn run_exec(
    addr: &str,
    user: &str,
    group: &str,
    timeout: Option<u64>,
    line: &str,
) -> anyhow::Result<bool> {
    let mut client = match timeout {
        Some(secs) => FileClient::connect_with_timeout(addr, Duration::from_secs(secs)).await,
        None => FileClient::connect(addr).await,
    }
    .with_context(|| format!("Failed to connect to {}", addr))?;

    client.login(user, group).await?;
    let response = client.send_line(line).await?;

    if response.status.is_success() {
        println!("{}", response.message);
    } else {
        eprintln!("{}: {}", response.status, response.message);
    }
    client.close().await?;
    Ok(response.status.is_success())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
#[cfg(unix)]
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
    let mut sigint =
        signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        }
    }
    Ok(())
}

/// Wait for a shutdown signal (Ctrl-C).
#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_command() {
        let cli = Cli::try_parse_from(["capfs-daemon", "start"]).unwrap();
        match cli.command {
            Commands::Start { port } => assert!(port.is_none()),
            _ => panic!("Expected Start command"),
        }
        assert!(!cli.verbose);
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_start_with_port_and_globals() {
        let cli = Cli::try_parse_from([
            "capfs-daemon",
            "start",
            "--port",
            "9000",
            "-v",
            "--config",
            "/tmp/capfs.toml",
        ])
        .unwrap();
        match cli.command {
            Commands::Start { port } => assert_eq!(port, Some(9000)),
            _ => panic!("Expected Start command"),
        }
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/capfs.toml")));
    }

    #[test]
    fn test_exec_command() {
        let cli = Cli::try_parse_from([
            "capfs-daemon",
            "exec",
            "--user",
            "alice",
            "--group",
            "G1",
            "create",
            "f1",
            "rwrnnn",
        ])
        .unwrap();
        match cli.command {
            Commands::Exec {
                addr,
                user,
                group,
                timeout,
                command,
            } => {
                assert_eq!(addr, "127.0.0.1:8888");
                assert_eq!(user, "alice");
                assert_eq!(group, "G1");
                assert!(timeout.is_none());
                assert_eq!(command.join(" "), "create f1 rwrnnn");
            }
            _ => panic!("Expected Exec command"),
        }
    }

    #[test]
    fn test_exec_requires_command() {
        assert!(
            Cli::try_parse_from(["capfs-daemon", "exec", "-u", "alice", "-g", "G1"]).is_err()
        );
    }

    #[test]
    fn test_exec_requires_identity() {
        assert!(Cli::try_parse_from(["capfs-daemon", "exec", "read", "f1"]).is_err());
    }

    #[test]
    fn test_config_command() {
        let cli = Cli::try_parse_from(["capfs-daemon", "config", "--save"]).unwrap();
        assert!(matches!(cli.command, Commands::Config { save: true }));
    }
}
