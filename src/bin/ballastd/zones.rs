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

//! Implements zone loading.

use std::ffi::OsStr;
use std::fmt::Write;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, error, info, warn};

use ballast::catalog::{Catalog, RecordInput, ZoneInput};
use ballast::model::{ZoneSet, ZoneSnapshot};
use ballast::name::Name;
use ballast::zone_file;

use crate::config::ZoneConfig;

/// The TTL for records that give none, when the zone source does not
/// set a default either.
const DEFAULT_TTL: u32 = 3600;

/// Loads the zones configured in `zones` and returns the names of those
/// that loaded. A zone that fails to load is logged and skipped.
pub async fn load(zones: &[ZoneConfig], catalog: &Catalog, zone_set: &ZoneSet) -> Vec<Name> {
    let mut loaded = Vec::new();
    let mut zones_failed = 0;

    for zone_config in zones {
        match load_zone(zone_config, catalog, zone_set).await {
            Ok(name) => loaded.push(name),
            Err(e) => {
                let mut message = format!("Failed to load {}:", zone_config.name.0);
                for (i, cause) in e.chain().enumerate() {
                    let _ = write!(message, "\n[{}] {}", i + 1, cause);
                }
                error!("{message}");
                zones_failed += 1;
            }
        }
    }

    match zones_failed {
        0 => info!("Loaded {} zone(s).", loaded.len()),
        1 => error!("1 zone failed to load."),
        n => error!("{n} zones failed to load."),
    }
    loaded
}

/// Loads `zones` again. Zones that were configured before but no longer
/// are removed; zones that fail to reload keep their old data.
pub async fn reload(
    zones: &[ZoneConfig],
    previous: &[Name],
    catalog: &Catalog,
    zone_set: &ZoneSet,
) -> Vec<Name> {
    for name in previous {
        if zones.iter().any(|z| z.name.0 == *name) {
            continue;
        }
        info!("Zone {name} is no longer configured; removing it.");
        if let Err(e) = catalog.delete(name).await {
            warn!("Failed to remove {name} from the catalog: {e}");
        }
        zone_set.remove(name);
    }
    load(zones, catalog, zone_set).await
}

async fn load_zone(
    zone_config: &ZoneConfig,
    catalog: &Catalog,
    zone_set: &ZoneSet,
) -> Result<Name> {
    let name = &zone_config.name.0;
    let (records, default_ttl) = match zone_config.path {
        None => (Vec::new(), DEFAULT_TTL),
        Some(ref path) => {
            debug!("Loading {name} from {}.", path.display());
            if is_snapshot(path) {
                let snapshot = read_snapshot(path, name)?;
                let records = snapshot.records.clone();
                let default_ttl = snapshot.ttl.unwrap_or(DEFAULT_TTL);
                zone_set
                    .load_snapshot(snapshot)
                    .with_context(|| format!("{} is not a valid zone", path.display()))?;
                (records, default_ttl)
            } else {
                let records: Vec<RecordInput> = zone_file::load(path, name)
                    .with_context(|| format!("failed to parse {}", path.display()))?;
                (records, DEFAULT_TTL)
            }
        }
    };

    catalog
        .add(ZoneInput {
            name: name.to_string(),
            kind: zone_config.zone_kind(),
            default_ttl,
            records,
        })
        .await
        .context("failed to add the zone to the catalog")
}

/// Returns whether `path` names a JSON zone snapshot rather than a
/// master file.
fn is_snapshot(path: &Path) -> bool {
    path.extension().and_then(OsStr::to_str) == Some("json")
}

/// Reads a JSON snapshot. The configured name wins over the one in the
/// file.
pub fn read_snapshot(path: &Path, name: &Name) -> Result<ZoneSnapshot> {
    let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let mut snapshot: ZoneSnapshot = serde_json::from_slice(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    if snapshot.name != name.as_str() {
        if !snapshot.name.is_empty() {
            warn!(
                "{} names zone {}, but it is configured as {name}.",
                path.display(),
                snapshot.name
            );
        }
        snapshot.name = name.to_string();
    }
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigName, ZoneKindConfig};
    use ballast::db::MemoryStore;
    use ballast::message::Question;
    use ballast::rr::Type;
    use ballast::util::SystemClock;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("ballastd-{tag}-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn zone_config(name: &str, path: PathBuf) -> ZoneConfig {
        ZoneConfig {
            name: ConfigName(name.parse().unwrap()),
            path: Some(path),
            kind: ZoneKindConfig::Master,
            forwarders: Vec::new(),
        }
    }

    #[tokio::test]
    async fn master_files_and_snapshots_load() {
        let dir = temp_dir("zones");
        fs::write(dir.join("a.test.zone"), "$TTL 60\nwww IN A 192.0.2.1\n").unwrap();
        fs::write(
            dir.join("b.test.json"),
            r#"{
                "name": "b.test.",
                "email": "hostmaster@b.test",
                "ttl": 300,
                "serial": 2,
                "resources": {},
                "records": [{ "name": "mail", "type": "A", "data": "192.0.2.2" }]
            }"#,
        )
        .unwrap();
        fs::write(dir.join("broken.zone"), "www IN A not-an-address\n").unwrap();

        let catalog = Catalog::new(Arc::new(MemoryStore::new()));
        let zone_set = ZoneSet::new(Arc::new(SystemClock));
        let configs = [
            zone_config("a.test.", dir.join("a.test.zone")),
            zone_config("b.test.", dir.join("b.test.json")),
            zone_config("broken.test.", dir.join("broken.zone")),
            zone_config("missing.test.", dir.join("missing.zone")),
        ];
        let loaded = load(&configs, &catalog, &zone_set).await;
        assert_eq!(loaded.len(), 2);

        let b: Name = "b.test.".parse().unwrap();
        assert!(zone_set.contains(&b));
        let question = Question::new("mail.b.test.".parse().unwrap(), Type::A);
        let records = catalog.lookup(&question, &b).await.unwrap();
        assert_eq!(records[0].ttl, 300);

        let reloaded = reload(&configs[..1], &loaded, &catalog, &zone_set).await;
        assert_eq!(reloaded.len(), 1);
        assert!(catalog.have(&b).is_none());
        assert!(!zone_set.contains(&b));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn snapshots_keep_entities_next_to_a_wrongly_typed_one() {
        let dir = temp_dir("lenient");
        let path = dir.join("c.test.json");
        fs::write(
            &path,
            r#"{
                "name": "c.test.",
                "email": "hostmaster@c.test",
                "ttl": 300,
                "resources": {
                    "lb": {
                        "ttl": 30,
                        "handler": "LeastLoad(2)",
                        "nodes": {
                            "n1": { "ips": ["192.0.2.1"], "load": 1 },
                            "n2": { "ips": ["192.0.2.2"], "load": "high" }
                        }
                    }
                }
            }"#,
        )
        .unwrap();

        let name: Name = "c.test.".parse().unwrap();
        let snapshot = read_snapshot(&path, &name).unwrap();
        let zone_set = ZoneSet::new(Arc::new(SystemClock));
        zone_set.load_snapshot(snapshot).unwrap();
        let nodes = zone_set.with_zone(&name, |z| z.resource("lb").map(|r| r.nodes().count()));
        assert_eq!(nodes, Some(Some(1)));
        fs::remove_dir_all(&dir).unwrap();
    }
}
