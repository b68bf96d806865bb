//! CLI entry point for hostwarden-exec.
//!
//! Logs go to stderr; stdout carries command output and listings only.

use std::io::{BufRead, Write};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use hostwarden_core::config as warden_config;
use hostwarden_core::types::{Device, DeviceAction, DEFAULT_SSH_PORT};
use hostwarden_registry::{DeviceRegistry, JsonDeviceRegistry, RegistryConfig};

use hostwarden_exec::{
    ActionOutcome, EscalationFlow, ExecConfig, ExecError, HostKeyScanner, SshExecutor,
};

#[derive(Parser)]
#[command(name = "hostwarden-exec")]
#[command(about = "Run commands and privileged actions on managed SSH devices")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Config file prefix (default: hostwarden).
    #[arg(short, long, default_value = warden_config::DEFAULT_FILE_PREFIX, global = true)]
    config: String,
}

#[derive(Subcommand)]
enum Command {
    /// Run a command on a device.
    Run {
        /// Device id or name.
        device: String,
        /// Command and arguments, after `--`.
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
    /// Power a device off.
    Shutdown {
        device: String,
        /// Save the sudo password if one is asked for.
        #[arg(long)]
        remember: bool,
    },
    /// Reboot a device.
    Restart {
        device: String,
        /// Save the sudo password if one is asked for.
        #[arg(long)]
        remember: bool,
    },
    /// Show a host's public key fingerprints.
    Keyscan {
        host: String,
        #[arg(short, long, default_value_t = DEFAULT_SSH_PORT)]
        port: u16,
    },
    /// Register a device.
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        host: String,
        #[arg(long)]
        user: String,
        #[arg(long, default_value_t = DEFAULT_SSH_PORT)]
        port: u16,
        /// Private key file.
        #[arg(long)]
        key: Option<String>,
        /// Log in with this password instead of a key.
        #[arg(long)]
        password: Option<String>,
        /// Trust the host key seen on first connect.
        #[arg(long)]
        accept_new_host_key: bool,
        /// Trust scanned fingerprints without asking.
        #[arg(long)]
        yes: bool,
    },
    /// List registered devices.
    List {
        #[arg(long)]
        json: bool,
    },
    /// Remove a device.
    Remove { device: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let cfg = warden_config::load(&cli.config)?;
    let exec_config: ExecConfig = warden_config::section(&cfg, "exec")?;
    let registry_config: RegistryConfig = warden_config::section(&cfg, "registry")?;

    let registry: Arc<dyn DeviceRegistry> = Arc::new(
        JsonDeviceRegistry::open(&registry_config.path)
            .with_context(|| format!("opening {}", registry_config.path.display()))?,
    );
    let executor = Arc::new(SshExecutor::new(exec_config.clone()));

    match cli.command {
        Command::Run { device, command } => {
            let device = find_device(registry.as_ref(), &device)?;
            match executor.execute_device(&device, &command.join(" ")).await {
                Ok(result) => print!("{}", result.output),
                Err(e) => fail(e)?,
            }
        }
        Command::Shutdown { device, remember } => {
            let device = find_device(registry.as_ref(), &device)?;
            run_action(executor, registry, &device, DeviceAction::Shutdown, remember).await?;
        }
        Command::Restart { device, remember } => {
            let device = find_device(registry.as_ref(), &device)?;
            run_action(executor, registry, &device, DeviceAction::Restart, remember).await?;
        }
        Command::Keyscan { host, port } => {
            let keys = HostKeyScanner::new(&exec_config).scan(&host, port).await?;
            for key in keys {
                println!("{} {}", key.key_type, key.fingerprint);
            }
        }
        Command::Add {
            name,
            host,
            user,
            port,
            key,
            password,
            accept_new_host_key,
            yes,
        } => {
            let mut device = Device::new(&name, &host, &user);
            device.port = port;
            device.ssh_key_path = key;
            device.use_password_auth = password.is_some();
            device.password = password;
            device.accept_new_host_key = accept_new_host_key;
            device.validate()?;

            if device.accept_new_host_key {
                let keys = HostKeyScanner::new(&exec_config)
                    .scan(&device.host, device.port)
                    .await
                    .context("host key scan failed; device not saved")?;
                eprintln!("Host keys for {}:{}", device.host, device.port);
                for key in &keys {
                    eprintln!("  {} {}", key.key_type, key.fingerprint);
                }
                if !yes && !confirm("Trust these keys and save the device? [y/N] ")? {
                    anyhow::bail!("Host keys not trusted; device not saved");
                }
            }

            registry.upsert(&device)?;
            println!("{}", device.id);
        }
        Command::List { json } => {
            let devices = registry.list_all()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&devices)?);
            } else {
                for d in devices {
                    println!(
                        "{}\t{}\t{}@{}:{}\t{}",
                        d.id,
                        d.name,
                        d.username,
                        d.host,
                        d.port,
                        d.status.label()
                    );
                }
            }
        }
        Command::Remove { device } => {
            let device = find_device(registry.as_ref(), &device)?;
            registry.delete(device.id)?;
            eprintln!("Removed {}", device.name);
        }
    }

    Ok(())
}

async fn run_action(
    executor: Arc<SshExecutor>,
    registry: Arc<dyn DeviceRegistry>,
    device: &Device,
    action: DeviceAction,
    remember: bool,
) -> anyhow::Result<()> {
    let mut flow = EscalationFlow::new(executor, registry);
    let outcome = match flow.run_action(device, action).await {
        Ok(outcome) => outcome,
        Err(e) => return fail(e),
    };

    match outcome {
        ActionOutcome::Completed(result) => print!("{}", result.output),
        ActionOutcome::NeedsCredential(request) => {
            let prompt = format!(
                "sudo password for {}@{}: ",
                request.device.username, request.device.host
            );
            let password = read_line(&prompt)?;
            let result = flow.submit_credential(&password, remember).await?;
            print!("{}", result.output);
        }
    }
    Ok(())
}

fn find_device(registry: &dyn DeviceRegistry, id_or_name: &str) -> anyhow::Result<Device> {
    registry
        .find(id_or_name)?
        .ok_or_else(|| anyhow::anyhow!("No device named or with id {id_or_name}"))
}

/// Print the remote output of a failed command, then fail with its message.
fn fail(e: ExecError) -> anyhow::Result<()> {
    let output = e.output();
    if !output.is_empty() {
        eprint!("{output}");
    }
    Err(e.into())
}

fn read_line(prompt: &str) -> anyhow::Result<String> {
    let mut stderr = std::io::stderr();
    stderr.write_all(prompt.as_bytes())?;
    stderr.flush()?;

    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn confirm(prompt: &str) -> anyhow::Result<bool> {
    let answer = read_line(prompt)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}
