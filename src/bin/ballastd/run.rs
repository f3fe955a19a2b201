// Copyright 2022 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! Implements the `run` command (i.e., running the server).

use std::fmt::Write;
use std::path::Path;
use std::process;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use env_logger::Env;
use log::{error, info};
use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use ballast::cache::{GcTask, ResponseCache};
use ballast::catalog::Catalog;
use ballast::db::MemoryStore;
use ballast::io::{DnsListener, ShutdownController, UdpUpstream};
use ballast::model::ZoneSet;
use ballast::name::Name;
use ballast::rpc::{ExchangeTask, PeerChannel, Replicator, RpcServer, TcpPeer};
use ballast::server::{Acl, Server};
use ballast::util::{Clock, SystemClock};

use crate::args::RunArgs;
use crate::config::{self, Config, ZoneConfig};
use crate::persist::{self, Persister};
use crate::zones;

/// Runs the server.
pub fn run(args: RunArgs) {
    env_logger::init_from_env(Env::new().default_filter_or("warn"));

    if let Err(e) = try_running(args) {
        error!("{}", describe_error("Failed to run:", &e));
        process::exit(1);
    }
    info!("Exiting with success.");
}

/// Formats an error with its causes as a numbered list.
fn describe_error(header: &str, e: &anyhow::Error) -> String {
    let mut message = String::from(header);
    for (i, cause) in e.chain().enumerate() {
        let _ = write!(message, "\n[{}] {}", i + 1, cause);
    }
    message
}

fn try_running(run_args: RunArgs) -> Result<()> {
    info!(
        "Ballast daemon v{}.{}.{} starting.",
        env!("CARGO_PKG_VERSION_MAJOR"),
        env!("CARGO_PKG_VERSION_MINOR"),
        env!("CARGO_PKG_VERSION_PATCH"),
    );

    // Get the configuration, either from the file system or from the
    // command line arguments, as appropriate.
    let (config, reload_source) = if let Some(ref config_path) = run_args.config {
        info!("Loading the configuration from {}.", config_path.display());
        let config = config::load_from_path(config_path, false)
            .context("failed to load the configuration")?;
        (config, ReloadSource::Config(config_path.as_path()))
    } else {
        info!("Loading the configuration from the command line.");
        let config =
            config::load_from_args(run_args).context("failed to load the configuration")?;
        let reload_source = ReloadSource::Args(config.zones.clone());
        (config, reload_source)
    };

    let runtime = Runtime::new().context("failed to start the Tokio runtime")?;
    let mut daemon = runtime.block_on(Daemon::start(&config))?;

    let mut signals = set_up_signal_handling().context("failed to set up signal handling")?;
    info!("Set-up is complete; the server is running.");

    for signal in signals.forever() {
        match signal {
            SIGINT | SIGTERM => {
                let name = if signal == SIGINT { "SIGINT" } else { "SIGTERM" };
                info!("Received {name}; shutting down.");
                break;
            }
            SIGHUP => {
                info!("Received SIGHUP; reloading zones.");
                if let Err(e) = runtime.block_on(daemon.reload(&reload_source)) {
                    error!("{}", describe_error("Failed to reload zones:", &e));
                }
            }
            _ => (),
        }
    }

    runtime.block_on(daemon.shut_down());
    info!("Shutdown complete.");
    Ok(())
}

fn set_up_signal_handling() -> Result<Signals> {
    let all_signals = &[SIGHUP, SIGINT, SIGTERM];
    let term_signals = &[SIGINT, SIGTERM];
    let already_terminating = Arc::new(AtomicBool::new(false));

    // A second termination signal exits immediately, even if graceful
    // shutdown has not finished.
    for sig in term_signals {
        signal_hook::flag::register_conditional_shutdown(*sig, 1, already_terminating.clone())?;
        signal_hook::flag::register(*sig, already_terminating.clone())?;
    }

    Signals::new(all_signals).map_err(Into::into)
}

enum ReloadSource<'a> {
    Args(Vec<ZoneConfig>),
    Config(&'a Path),
}

/// The running server's parts.
struct Daemon {
    catalog: Arc<Catalog>,
    zones: Arc<ZoneSet>,
    zone_names: Vec<Name>,
    dns: ShutdownController,
    rpc: Option<ShutdownController>,
    exchange: Option<ExchangeTask>,
    gc: GcTask,
    events: JoinHandle<()>,
}

impl Daemon {
    async fn start(config: &Config) -> Result<Self> {
        // Bind before loading zones: zone loading may be slow, so it's
        // better to fail fast.
        let listener = DnsListener::bind(config.listen_addrs())
            .await
            .context("failed to bind sockets")?;

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let (event_sender, event_receiver) = mpsc::unbounded_channel();
        let deep_compare = config.rpc.as_ref().map_or(false, |rpc| rpc.deep_compare);
        let zones = Arc::new(
            ZoneSet::new(clock.clone())
                .with_events(event_sender)
                .with_deep_compare(deep_compare),
        );
        let catalog = Arc::new(Catalog::new(Arc::new(MemoryStore::new())));
        let cache = Arc::new(ResponseCache::new(
            Arc::new(MemoryStore::new()),
            clock.clone(),
            config.cache.max_keys,
        ));

        info!("Beginning to load {} zone(s).", config.zones.len());
        let zone_names = zones::load(&config.zones, &catalog, &zones).await;

        let server = Arc::new(
            Server::new(
                catalog.clone(),
                zones.clone(),
                cache.clone(),
                Arc::new(UdpUpstream::new()),
            )
            .with_acl(Acl::new(config.acl_rules()))
            .with_forwarders(config.forwarders.clone())
            .with_upstream_timeout(config.upstream_timeout()),
        );

        let (replicator, rpc, exchange) = match config.rpc {
            Some(ref rpc_config) => {
                let skew = Duration::from_secs(rpc_config.max_clock_skew);
                let peers: Vec<Arc<dyn PeerChannel>> = rpc_config
                    .peers
                    .iter()
                    .map(|&addr| {
                        Arc::new(TcpPeer::new(addr, clock.clone(), skew)) as Arc<dyn PeerChannel>
                    })
                    .collect();
                let mut replicator = Replicator::new(zones.clone(), peers);
                if let Some(bind) = rpc_config.bind {
                    replicator = replicator.with_self_id(bind.to_string());
                }
                let replicator = Arc::new(replicator);

                let rpc = match rpc_config.bind {
                    Some(bind) => {
                        let listener = RpcServer::bind(bind)
                            .await
                            .context("failed to bind the RPC listener")?;
                        let rpc_server =
                            Arc::new(RpcServer::new(replicator.clone(), clock.clone(), skew));
                        info!("Accepting peer RPC on {bind}.");
                        Some(rpc_server.start(listener))
                    }
                    None => None,
                };
                let exchange = (!rpc_config.peers.is_empty()).then(|| {
                    replicator.start(Duration::from_secs(rpc_config.exchange_interval))
                });
                (Some(replicator), rpc, exchange)
            }
            None => (None, None, None),
        };

        let persister = Persister::new(config.zone_dir.clone(), catalog.clone(), zones.clone());
        let events = persist::spawn_event_loop(event_receiver, persister, replicator);
        let gc = cache.start(Duration::from_secs(config.cache.gc_interval));
        let listen_addrs = listener.local_addrs().context("failed to read bound addresses")?;
        let dns = listener.start(&server);
        for addr in listen_addrs {
            info!("Serving DNS on {addr}.");
        }

        Ok(Self {
            catalog,
            zones,
            zone_names,
            dns,
            rpc,
            exchange,
            gc,
            events,
        })
    }

    async fn reload(&mut self, source: &ReloadSource<'_>) -> Result<()> {
        let zone_configs = match source {
            ReloadSource::Args(zone_configs) => zone_configs.clone(),
            ReloadSource::Config(path) => {
                config::load_from_path(path, true)
                    .context("failed to reload the configuration")?
                    .zones
            }
        };
        self.zone_names =
            zones::reload(&zone_configs, &self.zone_names, &self.catalog, &self.zones).await;
        Ok(())
    }

    async fn shut_down(self) {
        self.dns.shut_down().await;
        if let Some(rpc) = self.rpc {
            rpc.shut_down().await;
        }
        if let Some(exchange) = self.exchange {
            exchange.stop();
        }
        self.gc.stop();
        self.events.abort();
    }
}
