use anyhow::{Context, bail};
use std::time::{Duration, Instant};
use tandem_config::EndpointConfig;
use tandem_ipc::{IpcChannel, Role};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

const PING_INTERVAL: Duration = Duration::from_millis(250);

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

    if config.purge_stale {
        let removed = IpcChannel::remove(&config.name, config.channel_number)
            .context("purging stale channel names")?;
        info!(removed, "purged stale channel names");
    }

    let mut channel = IpcChannel::with_options(config.channel_options(Role::Master))
        .context("opening channel")?;
    info!(
        name = %config.name,
        channel_number = config.channel_number,
        "master running, waiting for slave replies"
    );

    let timeout = Some(config.receive_timeout());
    let mut reply = Vec::new();
    let mut missed = 0u32;
    let mut seq = 0u64;

    loop {
        seq += 1;
        let ping = format!("ping {seq}");
        let sent_at = Instant::now();
        channel.send(&ping).context("sending ping")?;

        if channel.receive_into(&mut reply, timeout).context("waiting for reply")? {
            missed = 0;
            if reply == ping.as_bytes() {
                debug!(seq, rtt = ?sent_at.elapsed(), "reply");
            } else {
                // A late echo of an earlier ping.
                warn!(seq, reply = %String::from_utf8_lossy(&reply), "out of order reply");
            }
        } else {
            missed += 1;
            warn!(seq, missed, "no reply from slave");
            if missed >= config.max_missed_replies {
                error!(missed, "slave is not responding, giving up");
                bail!("slave missed {missed} consecutive replies");
            }
        }

        std::thread::sleep(PING_INTERVAL);
    }
}
