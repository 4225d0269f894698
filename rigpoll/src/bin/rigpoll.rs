//! Poll the configured rigs or pools once and print or send the results.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde::Serialize;
use time::UtcOffset;

use rigpoll::config::Config;
use rigpoll::dispatch::{Dispatcher, Spec};
use rigpoll::normalize::{self, Present};
use rigpoll::report::TracingReporter;
use rigpoll::tracing::{self, prelude::*};
use rigpoll::zabbix::Sender;

/// Poll mining rigs and pools
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "rigpoll.toml")]
    config: PathBuf,

    /// Which tasks to poll
    #[arg(value_enum)]
    target: Target,

    /// What to do with the results
    #[arg(value_enum, default_value_t = View::Table)]
    view: View,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Target {
    Miners,
    Pools,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum View {
    /// Every exchange as received
    Raw,
    /// One normalized row per task
    Table,
    /// Metric batches as JSON
    Metrics,
    /// Push metric batches to Zabbix
    Send,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // The local offset can only be read reliably before threads exist.
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);

    tracing::init_journald_or_stderr();

    let config = Config::load_from(&args.config)
        .with_context(|| format!("Failed to load configuration: {:?}", args.config))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start the runtime")?;

    runtime.block_on(async {
        match args.target {
            Target::Miners => {
                let policy = config.poll.address_policy;
                poll(&config, &config.miners, &policy, args.view, offset).await
            }
            Target::Pools => poll(&config, &config.pools, &(), args.view, offset).await,
        }
    })
}

async fn poll<S>(
    config: &Config,
    specs: &[S],
    context: &S::Context,
    view: View,
    offset: UtcOffset,
) -> Result<()>
where
    S: Spec,
    S::Task: Present,
{
    let sender = match (view, &config.zabbix) {
        (View::Send, Some(zabbix)) => Some(Sender::new(zabbix.socket_addr(), zabbix.timeout())),
        (View::Send, None) => anyhow::bail!("sending metrics requires a [zabbix] section"),
        _ => None,
    };

    let mut dispatcher = Dispatcher::new().with_max_in_flight(config.poll.max_in_flight);
    dispatcher
        .register(specs, context)
        .context("Invalid task configuration")?;
    info!(tasks = specs.len(), "Polling.");

    let union = dispatcher.dispatch().await;

    match view {
        View::Raw => print(&union),
        View::Table => print(&normalize::table(&union, offset)),
        View::Metrics => print(&normalize::metrics(&union, &TracingReporter)),
        View::Send => {
            let batches = normalize::metrics(&union, &TracingReporter);
            if let Some(sender) = sender {
                let accepted = sender.send_all(&batches, &TracingReporter).await;
                info!(accepted, batches = batches.len(), "Done.");
            }
            Ok(())
        }
    }
}

fn print<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to encode results")?;
    println!("{}", text);
    Ok(())
}
