use std::time::Duration;

use pollguard::{Event, EventKind, RequestConfig, RequestController, RequestDescriptor};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,pollguard=debug")),
        )
        .init();

    let url = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("POLL_URL").ok())
        .ok_or_else(|| anyhow::anyhow!("usage: poll <url> (or set POLL_URL)"))?;
    let rounds: usize = std::env::var("POLL_ROUNDS")
        .ok()
        .map(|raw| raw.parse())
        .transpose()?
        .unwrap_or(5);

    let config = RequestConfig::default()
        .with_recurring(true)
        .with_max_tries(4)
        .with_timeout_ms(30_000);
    let poller = RequestController::new(config)?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let errors = tx.clone();
    poller.on(EventKind::Finished, move |_, event| {
        let _ = tx.send(event.clone());
    });
    poller.on(EventKind::Error, move |_, event| {
        let _ = errors.send(event.clone());
    });

    poller.start(RequestDescriptor::get(url).with_header("Accept", "application/json"))?;

    for round in 1..=rounds {
        match tokio::time::timeout(Duration::from_secs(120), rx.recv()).await? {
            Some(Event::Finished { code, result, .. }) => {
                println!("#{round} {code}: {result:?}");
            }
            Some(Event::Error { reason }) => {
                eprintln!("#{round} gave up: {reason}");
                break;
            }
            None => break,
        }
    }

    poller.abort();
    Ok(())
}
