use amguard::{
    cli::{CtlCli, PatternArg, load_config},
    init_logging,
};
use anyhow::Context;
use clap::Parser;
use guard::ControlClient;
use guard::control::socket_path;
use std::io::Write;
use tracing::debug;

fn main() -> anyhow::Result<()> {
    let cli = CtlCli::parse();
    init_logging(cli.verbosity.log_level_filter().as_str())?;

    let runtime_dir = match &cli.runtime_dir {
        Some(dir) => dir.clone(),
        None => load_config(cli.config.as_deref())?.control.runtime_dir,
    };
    let mount_point = std::fs::canonicalize(&cli.mount_point)
        .with_context(|| format!("cannot resolve mount point {}", cli.mount_point.display()))?;
    let socket = socket_path(&runtime_dir, &mount_point);
    debug!(socket = %socket.display(), "connecting");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(&cli, &socket))
}

async fn run(cli: &CtlCli, socket: &std::path::Path) -> anyhow::Result<()> {
    let mut client = ControlClient::connect(socket)
        .await
        .with_context(|| format!("is amguardd running? cannot connect to {}", socket.display()))?;

    if cli.action.list {
        let patterns = client.list().await?;
        if patterns.is_empty() {
            writeln!(
                std::io::stderr(),
                "no patterns in the database, add one with `amguardctl -a <pattern> {}`",
                cli.mount_point.display()
            )?;
        } else {
            std::io::stdout().write_all(&patterns)?;
        }
    } else if let Some(PatternArg(pattern)) = &cli.action.add {
        client.add(pattern).await.context("cannot add pattern")?;
    } else if let Some(PatternArg(pattern)) = &cli.action.remove {
        let removal_count = client.remove(pattern).await.context("cannot remove pattern")?;
        debug!(removal_count, "pattern removed");
    }
    Ok(())
}
