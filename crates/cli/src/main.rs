use amguard::{
    cli::{Cli, load_config},
    init_logging,
    signals::{SignalEvent, Signals},
};
use anyhow::Context;
use clap::Parser;
use flume::bounded;
use guard::{ControlEvent, GuardEngine, Services};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[cfg(feature = "jemalloc")]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbosity.log_level_filter().as_str())?;

    let mut config = load_config(cli.config.as_deref())?;
    cli.apply(&mut config);
    debug!(?config, ?cli);

    let mount_point = std::fs::canonicalize(&cli.mount_point)
        .with_context(|| format!("cannot resolve mount point {}", cli.mount_point.display()))?;

    // install signal handlers before anything can block on them
    let signals = Signals::install()?;
    let (signals_tx, signals_rx) = bounded(8);
    let signal_handle = tokio::spawn(signals.forward(signals_tx));

    let services = Services::system(&config);
    let mut engine = GuardEngine::load(config, &mount_point, services)
        .with_context(|| format!("cannot load pattern database of {}", mount_point.display()))?;
    info!(mount = %mount_point.display(), socket = %engine.socket_path().display(), "guard loaded");

    let cancel = CancellationToken::new();
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let forward_handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            while let Ok(event) = signals_rx.recv_async().await {
                let control = match event {
                    SignalEvent::Shutdown => {
                        cancel.cancel();
                        break;
                    }
                    SignalEvent::DumpStatus => ControlEvent::DumpStatus,
                    SignalEvent::SaveNow => ControlEvent::SaveNow,
                };
                if control_tx.send(control).is_err() {
                    break;
                }
            }
        })
    };

    let result = engine.run_until(cancel, control_rx).await;
    forward_handle.abort();
    signal_handle.abort();
    result?;
    Ok(())
}
