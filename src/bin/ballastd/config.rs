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

//! Implements the server configuration file.

use std::fmt::{self, Write};
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use ipnetwork::IpNetwork;
use log::Level::Debug;
use log::{debug, log_enabled};
use paste::paste;
use serde::{de, Deserialize};

use ballast::catalog::ZoneKind;
use ballast::name::Name;
use ballast::server::AclRule;

use crate::args::RunArgs;

////////////////////////////////////////////////////////////////////////
// CONFIGURATION LOADING                                              //
////////////////////////////////////////////////////////////////////////

/// Loads the server configuration from the file given by `path`.
///
/// The `reloading` parameter controls how the configuration is
/// summarized in the log: if reloading, only the zone configuration
/// (the only thing that we support reloading) is summarized.
pub fn load_from_path(path: impl AsRef<Path>, reloading: bool) -> Result<Config> {
    let dir = path
        .as_ref()
        .parent()
        .ok_or_else(|| anyhow!("the configuration file path has no parent"))?;
    let raw_config =
        fs::read_to_string(path.as_ref()).context("failed to read the configuration file")?;
    let mut config: Config =
        toml::from_str(&raw_config).context("failed to parse the configuration file")?;

    // Relative paths are interpreted relative to the configuration
    // file's directory.
    for zone_config in &mut config.zones {
        if let Some(ref mut zone_path) = zone_config.path {
            if zone_path.is_relative() {
                *zone_path = dir.join(&zone_path);
            }
        }
    }
    if let Some(ref mut zone_dir) = config.zone_dir {
        if zone_dir.is_relative() {
            *zone_dir = dir.join(&zone_dir);
        }
    }

    config.validate()?;
    if reloading {
        log_zone_summary(&config.zones);
    } else {
        log_config_summary(&config);
    }
    Ok(config)
}

/// Loads the server configuration from the parsed command line
/// arguments given by `args`.
pub fn load_from_args(args: RunArgs) -> Result<Config> {
    let bind = args.bind.unwrap_or_else(|| {
        let ip = args.ip.unwrap_or(DEFAULT_LISTEN_IP);
        let port = args.port.unwrap_or(DEFAULT_LISTEN_PORT);
        SocketAddr::new(ip, port)
    });

    let config = Config {
        listen: vec![ListenConfig {
            ip: bind.ip(),
            port: bind.port(),
        }],
        acl: Vec::new(),
        zones: args
            .zones
            .into_iter()
            .map(|zd| ZoneConfig {
                name: ConfigName(zd.name),
                path: Some(zd.path),
                kind: ZoneKindConfig::Master,
                forwarders: Vec::new(),
            })
            .collect(),
        cache: CacheConfig::default(),
        rpc: None,
        forwarders: args.forwarders,
        upstream_timeout: default_upstream_timeout(),
        zone_dir: None,
    };
    config.validate()?;
    log_config_summary(&config);
    Ok(config)
}

/// Summarizes the configuration in the log, if the debug log level is
/// enabled.
fn log_config_summary(config: &Config) {
    if !log_enabled!(Debug) {
        return;
    }

    let listen: Vec<String> = config.listen_addrs().iter().map(ToString::to_string).collect();
    let forwarders: Vec<String> = config.forwarders.iter().map(ToString::to_string).collect();
    let mut message = format!(
        "Configuration loaded:\n\
         Listening on: {}\n\
         ACL rules:    {}\n\
         Forwarders:   {}\n\
         Cache size:   {} names\n\
         Peer RPC:     {}\n\
         Zones:        ",
        listen.join(", "),
        config.acl.len(),
        if forwarders.is_empty() {
            "none".to_owned()
        } else {
            forwarders.join(", ")
        },
        config.cache.max_keys,
        if config.rpc.is_some() {
            "enabled"
        } else {
            "disabled"
        },
    );
    summarize_zones(&config.zones, &mut message);
    debug!("{message}");
}

/// Summarizes only the zones in the log, if the debug log level is
/// enabled. Used when reloading.
fn log_zone_summary(zones: &[ZoneConfig]) {
    if log_enabled!(Debug) {
        let mut message = String::from("Zones reloaded:\nZones: ");
        summarize_zones(zones, &mut message);
        debug!("{message}");
    }
}

fn summarize_zones(zones: &[ZoneConfig], message: &mut String) {
    if zones.is_empty() {
        message.push_str("none to load");
    } else {
        let _ = write!(message, "{} to load", zones.len());
        for zone_config in zones {
            let _ = write!(message, "\n  {} ({})", zone_config.name.0, zone_config.kind.name());
        }
    }
}

////////////////////////////////////////////////////////////////////////
// CONFIGURATION FILE STRUCTURE                                       //
////////////////////////////////////////////////////////////////////////

/// The complete configuration file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: Vec<ListenConfig>,
    #[serde(default)]
    pub acl: Vec<AclConfig>,
    #[serde(default)]
    pub zones: Vec<ZoneConfig>,
    #[serde(default)]
    pub cache: CacheConfig,
    pub rpc: Option<RpcConfig>,
    #[serde(default)]
    pub forwarders: Vec<SocketAddr>,
    #[serde(default = "default_upstream_timeout")]
    pub upstream_timeout: u64,
    pub zone_dir: Option<PathBuf>,
}

impl Config {
    pub fn listen_addrs(&self) -> Vec<SocketAddr> {
        self.listen
            .iter()
            .map(|l| SocketAddr::new(l.ip, l.port))
            .collect()
    }

    pub fn acl_rules(&self) -> Vec<AclRule> {
        self.acl
            .iter()
            .map(|rule| AclRule {
                name: rule.name.clone(),
                networks: rule.networks.iter().map(|n| n.0).collect(),
                recursion: rule.recursion,
            })
            .collect()
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout)
    }

    /// Checks the constraints that serde cannot express.
    fn validate(&self) -> Result<()> {
        if self.listen.is_empty() {
            return Err(anyhow!("at least one listen address is required"));
        }
        for zone_config in &self.zones {
            match zone_config.kind {
                ZoneKindConfig::Master if zone_config.path.is_none() => {
                    return Err(anyhow!("master zone {} has no path", zone_config.name.0));
                }
                ZoneKindConfig::Forward if zone_config.forwarders.is_empty() => {
                    return Err(anyhow!("forward zone {} has no forwarders", zone_config.name.0));
                }
                _ => (),
            }
        }
        Ok(())
    }
}

const DEFAULT_LISTEN_IP: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
const DEFAULT_LISTEN_PORT: u16 = 53;

fn default_listen() -> Vec<ListenConfig> {
    vec![ListenConfig {
        ip: DEFAULT_LISTEN_IP,
        port: DEFAULT_LISTEN_PORT,
    }]
}

fn default_upstream_timeout() -> u64 {
    5
}

/// An interface to serve queries on.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListenConfig {
    pub ip: IpAddr,
    #[serde(default = "default_listen_port")]
    pub port: u16,
}

fn default_listen_port() -> u16 {
    DEFAULT_LISTEN_PORT
}

/// A named ACL rule.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AclConfig {
    pub name: String,
    pub networks: Vec<ConfigNetwork>,
    #[serde(default)]
    pub recursion: bool,
}

////////////////////////////////////////////////////////////////////////
// CONFIGURATION SECTION: ZONES                                       //
////////////////////////////////////////////////////////////////////////

/// The configuration of a single zone.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ZoneConfig {
    pub name: ConfigName,
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub kind: ZoneKindConfig,
    #[serde(default)]
    pub forwarders: Vec<SocketAddr>,
}

impl ZoneConfig {
    pub fn zone_kind(&self) -> ZoneKind {
        match self.kind {
            ZoneKindConfig::Master => ZoneKind::Master,
            ZoneKindConfig::Forward => ZoneKind::Forward(self.forwarders.clone()),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ZoneKindConfig {
    #[default]
    Master,
    Forward,
}

impl ZoneKindConfig {
    fn name(self) -> &'static str {
        match self {
            Self::Master => "master",
            Self::Forward => "forward",
        }
    }
}

////////////////////////////////////////////////////////////////////////
// CONFIGURATION SECTION: CACHE AND PEERS                             //
////////////////////////////////////////////////////////////////////////

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    #[serde(default = "default_max_keys")]
    pub max_keys: usize,
    #[serde(default = "default_gc_interval")]
    pub gc_interval: u64,
}

fn default_max_keys() -> usize {
    1000
}

fn default_gc_interval() -> u64 {
    60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_keys: default_max_keys(),
            gc_interval: default_gc_interval(),
        }
    }
}

/// The peer RPC configuration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RpcConfig {
    pub bind: Option<SocketAddr>,
    #[serde(default)]
    pub peers: Vec<SocketAddr>,
    #[serde(default = "default_exchange_interval")]
    pub exchange_interval: u64,
    #[serde(default = "default_max_clock_skew")]
    pub max_clock_skew: u64,
    #[serde(default)]
    pub deep_compare: bool,
}

fn default_exchange_interval() -> u64 {
    30
}

fn default_max_clock_skew() -> u64 {
    5
}

////////////////////////////////////////////////////////////////////////
// WRAPPERS OVER LIBRARY TYPES FOR SERDE                              //
////////////////////////////////////////////////////////////////////////

/// Generates a deserializable `ConfigX` structure wrapping an `X` type,
/// using its [`FromStr`](std::str::FromStr) implementation.
macro_rules! make_serde_wrapper {
    ($wrapper:ident, $over:ty, $description:literal) => {
        /// A macro-generated deserializable wrapper.
        #[derive(Clone, Debug)]
        pub struct $wrapper(pub $over);

        impl<'de> Deserialize<'de> for $wrapper {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: de::Deserializer<'de>,
            {
                deserializer.deserialize_str(paste! { [<$wrapper Visitor>] })
            }
        }

        paste! {
            /// A macro-generated [`Visitor`](de::Visitor).
            #[derive(Debug)]
            struct [<$wrapper Visitor>];
        }

        impl<'de> de::Visitor<'de> for paste! { [<$wrapper Visitor>] } {
            type Value = $wrapper;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str($description)
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                value
                    .parse()
                    .map($wrapper)
                    .map_err(|e| E::custom(format!("invalid {}: {}", $description, e)))
            }
        }
    };
}

make_serde_wrapper!(ConfigName, Name, "domain name");
make_serde_wrapper!(ConfigNetwork, IpNetwork, "IP network");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_configuration_parses() {
        let config: Config = toml::from_str(
            r#"
            forwarders = ["8.8.8.8:53", "8.8.4.4:53"]
            upstream_timeout = 3
            zone_dir = "zones"

            [[listen]]
            ip = "0.0.0.0"
            port = 15353

            [[acl]]
            name = "local"
            networks = ["127.0.0.1", "10.0.0.0/8"]
            recursion = true

            [[zones]]
            name = "Example.com."
            path = "example.com.zone"

            [[zones]]
            name = "corp.internal."
            kind = "forward"
            forwarders = ["10.1.1.1:53"]

            [cache]
            max_keys = 10

            [rpc]
            bind = "0.0.0.0:5354"
            peers = ["10.0.0.2:5354"]
            "#,
        )
        .unwrap();
        config.validate().unwrap();

        assert_eq!(config.listen_addrs(), ["0.0.0.0:15353".parse().unwrap()]);
        assert_eq!(config.upstream_timeout(), Duration::from_secs(3));
        assert_eq!(config.cache.max_keys, 10);
        assert_eq!(config.cache.gc_interval, 60);
        assert_eq!(config.zones[0].name.0.as_str(), "example.com.");
        assert_eq!(config.zones[0].zone_kind(), ZoneKind::Master);
        assert_eq!(
            config.zones[1].zone_kind(),
            ZoneKind::Forward(vec!["10.1.1.1:53".parse().unwrap()])
        );

        let rules = config.acl_rules();
        assert!(rules[0].recursion);
        assert_eq!(rules[0].networks.len(), 2);

        let rpc = config.rpc.unwrap();
        assert_eq!(rpc.exchange_interval, 30);
        assert_eq!(rpc.max_clock_skew, 5);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<Config>("colour = \"blue\"").is_err());
        assert!(toml::from_str::<Config>("[cache]\nsize = 3").is_err());
    }

    #[test]
    fn zones_need_a_source() {
        let config: Config = toml::from_str(
            r#"
            [[zones]]
            name = "example.com."
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn relative_paths_follow_the_configuration_file() {
        let dir = std::env::temp_dir().join(format!("ballastd-config-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("ballast.toml");
        fs::write(
            &path,
            "zone_dir = \"state\"\n[[zones]]\nname = \"example.com.\"\npath = \"example.com.json\"\n",
        )
        .unwrap();
        let config = load_from_path(&path, false).unwrap();
        assert_eq!(config.zones[0].path, Some(dir.join("example.com.json")));
        assert_eq!(config.zone_dir, Some(dir.join("state")));
        fs::remove_dir_all(&dir).unwrap();
    }
}
