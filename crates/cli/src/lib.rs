#![forbid(unsafe_code)]

pub mod cli;
pub mod signals;

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber.
///
/// The verbosity flag takes precedence over the environment variable for log
/// control. For example, `AMGUARD_LOG=warn amguardd -vv /srv` still logs at
/// the trace level. The environment variable (`AMGUARD_LOG`) can only set the
/// level per crate, e.g. `AMGUARD_LOG=guard=debug`.
pub fn init_logging(level: &str) -> anyhow::Result<()> {
    let env_filter = EnvFilter::builder()
        .with_env_var("AMGUARD_LOG")
        .from_env()?
        .add_directive(level.parse()?);

    let layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_level(true)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(layer)
        .with(env_filter)
        .init();
    Ok(())
}
