use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use condo_core::secrets::{SecretStore, ACCESS_TOKEN_KEY};
use condo_whatsapp::{
    LifecycleAction, LifecycleController, LifecycleRunner, LifecycleSnapshot, Notice,
    NoticeLevel, Notifier, WhatsappStatus,
};
use tokio::time::interval;
use tracing::debug;

use crate::cli::{Cli, Commands};
use crate::config::Config;
use crate::main_lib::{build_controller, build_secret_store};

/// Prints notices for the person at the terminal.
pub struct TerminalNotifier;

impl Notifier for TerminalNotifier {
    fn notify(&self, notice: Notice) {
        match notice.level {
            NoticeLevel::Error => eprintln!("✗ {}", notice.message),
            NoticeLevel::Success => println!("✓ {}", notice.message),
        }
    }
}

pub async fn run(cli: Cli, config: Config) -> anyhow::Result<ExitCode> {
    let Cli {
        building,
        building_name,
        command,
    } = cli;
    let secret_store = build_secret_store(&config);

    let controller = |store: Arc<dyn SecretStore>| -> anyhow::Result<Arc<LifecycleController>> {
        let building = config.building(building.as_deref(), building_name.as_deref())?;
        build_controller(&config, store, building, Arc::new(TerminalNotifier))
    };

    match command {
        Commands::Login { token } => login(secret_store.as_ref(), &token, &config),
        Commands::Logout => {
            secret_store.delete_secret(ACCESS_TOKEN_KEY)?;
            println!("✓ Access token removed");
            Ok(ExitCode::SUCCESS)
        }
        Commands::Status { json } => status(controller(secret_store)?.as_ref(), json).await,
        Commands::Create => Ok(exit_code(controller(secret_store)?.create().await)),
        Commands::Connect { qr_out, wait } => {
            connect(controller(secret_store)?, &qr_out, wait).await
        }
        Commands::Disconnect => Ok(exit_code(controller(secret_store)?.disconnect().await)),
        Commands::Delete { yes } => {
            if !yes {
                bail!("Deleting removes the instance at the provider and on the server; pass --yes to confirm");
            }
            Ok(exit_code(controller(secret_store)?.delete().await))
        }
        Commands::Watch => watch(controller(secret_store)?).await,
    }
}

/// Action failures were already reported through the notifier.
fn exit_code(result: condo_whatsapp::Result<()>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            debug!("Action failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn login(store: &dyn SecretStore, token: &str, config: &Config) -> anyhow::Result<ExitCode> {
    let token = token.trim();
    if token.is_empty() {
        bail!("Access token must not be empty");
    }
    store.set_secret(ACCESS_TOKEN_KEY, token)?;
    println!(
        "✓ Access token saved to {}",
        config.secret_file.display()
    );
    Ok(ExitCode::SUCCESS)
}

async fn status(controller: &LifecycleController, json: bool) -> anyhow::Result<ExitCode> {
    if let Err(e) = controller.reconcile().await {
        eprintln!("✗ {}", e.user_message(LifecycleAction::Refresh));
        return Ok(ExitCode::FAILURE);
    }
    if controller.has_instance() {
        controller.poll_status().await;
    }

    let snapshot = controller.snapshot();
    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        print_snapshot(&snapshot);
    }
    Ok(ExitCode::SUCCESS)
}

async fn connect(
    controller: Arc<LifecycleController>,
    qr_out: &Path,
    wait: bool,
) -> anyhow::Result<ExitCode> {
    if controller.request_qr().await.is_err() {
        return Ok(ExitCode::FAILURE);
    }

    let snapshot = controller.snapshot();
    let Some(qr_code) = snapshot.qr_code.as_deref() else {
        bail!("The QR code expired before it could be saved");
    };
    let image = decode_qr(qr_code)?;
    std::fs::write(qr_out, image)
        .with_context(|| format!("Failed to write {}", qr_out.display()))?;
    println!(
        "  QR code written to {} (valid for {}s)",
        qr_out.display(),
        snapshot.time_left.unwrap_or_default()
    );

    if !wait {
        return Ok(ExitCode::SUCCESS);
    }

    let runner = LifecycleRunner::spawn(Arc::clone(&controller));
    let outcome = wait_for_link(&controller).await;
    runner.shutdown().await;
    Ok(outcome)
}

async fn wait_for_link(controller: &LifecycleController) -> ExitCode {
    let mut ticker = interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                println!("  Interrupted");
                return ExitCode::FAILURE;
            }
        }

        let snapshot = controller.snapshot();
        if snapshot.status == Some(WhatsappStatus::Connected) {
            println!("✓ Device linked");
            return ExitCode::SUCCESS;
        }
        match snapshot.time_left {
            Some(left) if left % 10 == 0 => println!("  QR valid for {}s", left),
            Some(_) => {}
            None => {
                eprintln!("✗ The QR code expired; run `condo connect` again");
                return ExitCode::FAILURE;
            }
        }
    }
}

async fn watch(controller: Arc<LifecycleController>) -> anyhow::Result<ExitCode> {
    let runner = LifecycleRunner::spawn(Arc::clone(&controller));
    let mut ticker = interval(Duration::from_secs(1));
    let mut last_line = String::new();

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => break,
        }

        let line = summary_line(&controller.snapshot());
        if line != last_line {
            println!("{}", line);
            last_line = line;
        }
    }

    runner.shutdown().await;
    Ok(ExitCode::SUCCESS)
}

/// Accepts raw base64 or a `data:image/png;base64,` URL.
fn decode_qr(qr_code: &str) -> anyhow::Result<Vec<u8>> {
    let payload = match qr_code.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => qr_code,
    };
    BASE64
        .decode(payload.trim())
        .context("The QR payload is not valid base64")
}

fn status_label(snapshot: &LifecycleSnapshot) -> &'static str {
    snapshot
        .status
        .map(WhatsappStatus::as_str)
        .unwrap_or("NO INSTANCE")
}

fn summary_line(snapshot: &LifecycleSnapshot) -> String {
    let mut line = format!("{:?}: {}", snapshot.phase, status_label(snapshot));
    if let Some(state) = &snapshot.provider_state {
        line.push_str(&format!(" (provider: {})", state.as_str()));
    }
    if let Some(left) = snapshot.time_left {
        line.push_str(&format!(", QR valid for {}s", left));
    }
    line
}

fn print_snapshot(snapshot: &LifecycleSnapshot) {
    println!("Building:  {}", snapshot.building_id);
    match &snapshot.instance {
        Some(instance) => {
            println!("Instance:  {}", instance.instance_name);
            println!("Attempts:  {}", instance.connection_attempts);
            if let Some(error) = &instance.last_error {
                println!("Error:     {}", error);
            }
        }
        None => println!("Instance:  none"),
    }
    println!("Status:    {}", summary_line(snapshot));

    let affordances = snapshot.affordances;
    let available: Vec<&str> = [
        (affordances.can_create, "create"),
        (affordances.can_link_device, "connect"),
        (affordances.can_disconnect, "disconnect"),
        (affordances.can_delete, "delete"),
    ]
    .iter()
    .filter(|(enabled, _)| *enabled)
    .map(|(_, name)| *name)
    .collect();
    println!("Actions:   {}", available.join(", "));
}
