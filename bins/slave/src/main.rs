use anyhow::Context;
use tandem_config::EndpointConfig;
use tandem_ipc::{IpcChannel, Role};
use tracing::{info, trace, warn};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => EndpointConfig::load(&path).with_context(|| format!("loading {path}"))?,
        None => EndpointConfig::default(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    let mut channel = IpcChannel::with_options(config.channel_options(Role::Slave))
        .context("opening channel")?;
    info!(
        name = %config.name,
        channel_number = config.channel_number,
        "slave running, echoing master messages"
    );

    let timeout = Some(config.receive_timeout());
    let mut msg = Vec::new();
    let mut idle = 0u32;

    loop {
        if channel.receive_into(&mut msg, timeout).context("waiting for master")? {
            idle = 0;
            trace!(len = msg.len(), "echo");
            channel.send(&msg).context("sending echo")?;
        } else {
            idle += 1;
            if idle >= config.max_missed_replies {
                warn!(idle, "master went quiet, exiting");
                return Ok(());
            }
        }
    }
}
