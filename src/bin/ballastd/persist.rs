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

//! Implements zone persistence and the zone event loop.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{debug, error, info};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

use ballast::catalog::{Catalog, ZoneInput, ZoneKind};
use ballast::model::{ZoneEvent, ZoneSet};
use ballast::name::Name;
use ballast::rpc::Replicator;

/// Writes zone snapshots to disk and keeps the catalog's static records
/// in step with zones replaced by peers.
pub struct Persister {
    zone_dir: Option<PathBuf>,
    catalog: Arc<Catalog>,
    zones: Arc<ZoneSet>,
}

impl Persister {
    pub fn new(zone_dir: Option<PathBuf>, catalog: Arc<Catalog>, zones: Arc<ZoneSet>) -> Self {
        Self {
            zone_dir,
            catalog,
            zones,
        }
    }

    /// Writes the snapshot of `zone` as pretty JSON to
    /// `<zone_dir>/<zone>.json`, through a temporary file so that a
    /// crash never leaves a partial snapshot behind.
    pub fn write(&self, zone: &Name) -> Result<()> {
        let Some(ref zone_dir) = self.zone_dir else {
            return Ok(());
        };
        let Some(snapshot) = self.zones.snapshot(zone) else {
            return Ok(());
        };

        let path = snapshot_path(zone_dir, zone);
        let temp_path = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(&snapshot).context("failed to serialize the zone")?;
        fs::create_dir_all(zone_dir)
            .with_context(|| format!("failed to create {}", zone_dir.display()))?;
        fs::write(&temp_path, json)
            .with_context(|| format!("failed to write {}", temp_path.display()))?;
        fs::rename(&temp_path, &path)
            .with_context(|| format!("failed to replace {}", path.display()))?;
        debug!("Wrote {} (serial {:?}).", path.display(), snapshot.serial);
        Ok(())
    }

    /// Reloads the catalog's records for a zone that a peer replaced.
    /// A forward zone keeps its forwarders.
    pub async fn refresh_catalog(&self, zone: &Name) -> Result<()> {
        let Some(snapshot) = self.zones.snapshot(zone) else {
            return Ok(());
        };
        let kind = self
            .catalog
            .have(zone)
            .filter(|info| info.name == *zone)
            .map_or(ZoneKind::Master, |info| info.kind.clone());
        self.catalog
            .add(ZoneInput {
                name: zone.to_string(),
                kind,
                default_ttl: snapshot.ttl.unwrap_or_default(),
                records: snapshot.records,
            })
            .await
            .context("failed to update the catalog")?;
        info!("Zone {zone} was replaced by a peer's copy.");
        Ok(())
    }
}

fn snapshot_path(zone_dir: &Path, zone: &Name) -> PathBuf {
    let file_name = if zone.is_root() {
        "root.json".to_owned()
    } else {
        format!("{}.json", zone.as_str().trim_end_matches('.'))
    };
    zone_dir.join(file_name)
}

/// Spawns the task that consumes zone events: property changes go to
/// the replicator, and changed zones are persisted.
pub fn spawn_event_loop(
    mut events: UnboundedReceiver<ZoneEvent>,
    persister: Persister,
    replicator: Option<Arc<Replicator>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ZoneEvent::Property(change) => {
                    if let Some(ref replicator) = replicator {
                        let replicator = replicator.clone();
                        tokio::spawn(async move { replicator.propagate(&change).await });
                    }
                }
                ZoneEvent::SerialChanged { zone, old, new } => {
                    debug!("Serial of {zone} went from {old} to {new}.");
                    if let Err(e) = persister.write(&zone) {
                        error!("Failed to persist {zone}: {e:#}");
                    }
                }
                ZoneEvent::Replaced(zone) => {
                    if let Err(e) = persister.refresh_catalog(&zone).await {
                        error!("Failed to refresh {zone}: {e:#}");
                    }
                }
            }
        }
    })
}
