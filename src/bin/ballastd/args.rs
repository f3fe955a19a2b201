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

//! Implements command-line argument parsing.

use std::ffi::OsStr;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::anyhow;
use clap::{ArgGroup, Parser, Subcommand};

use ballast::name::Name;

/// Parses the command line arguments.
pub fn parse() -> Args {
    Args::parse()
}

/// The Ballast load-balancing DNS server
#[derive(Debug, Parser)]
#[command(author, version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the server
    Run(RunArgs),
}

#[derive(Debug, Parser)]
#[command(group(ArgGroup::new("required").required(true).args(["config", "zones"])))]
pub struct RunArgs {
    /// Set the configuration file to use
    #[arg(long, conflicts_with_all = ["bind", "ip", "port", "forwarders"], value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Set the server bind IP address and port
    #[arg(long, value_name = "IP:PORT")]
    pub bind: Option<SocketAddr>,

    /// Set the server bind IP address
    #[arg(long, conflicts_with = "bind", value_name = "IP")]
    pub ip: Option<IpAddr>,

    /// Set the server port
    #[arg(long, conflicts_with = "bind", value_name = "PORT")]
    pub port: Option<u16>,

    /// Add zones to serve
    #[arg(long, num_args = 1.., value_delimiter = ',', value_name = "FILE|NAME:FILE")]
    pub zones: Vec<ZoneDescription>,

    /// Set the upstream servers for recursive queries
    #[arg(long, num_args = 1.., value_delimiter = ',', value_name = "IP:PORT")]
    pub forwarders: Vec<SocketAddr>,
}

/// A description of a zone provided on the command line with the
/// `--zones` option. Two forms are accepted; the second infers the
/// zone apex by stripping the `.zone` or `.json` suffix from the
/// basename of the path:
///
/// * `example.com.:path/to/the-zone-file.zone`
/// * `path/to/example.com.json`
#[derive(Clone, Debug)]
pub struct ZoneDescription {
    pub name: Name,
    pub path: PathBuf,
}

impl FromStr for ZoneDescription {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some((name, path)) = s.split_once(':') {
            Ok(Self {
                name: name.parse().map_err(|e| anyhow!("invalid zone name: {e}"))?,
                path: PathBuf::from(path),
            })
        } else if s.ends_with(".zone") || s.ends_with(".json") {
            let stem = Path::new(s)
                .file_stem()
                .and_then(OsStr::to_str)
                .ok_or_else(|| anyhow!("failed to compute zone name from zone file path"))?;
            Ok(Self {
                name: format!("{stem}.")
                    .parse()
                    .map_err(|e| anyhow!("invalid zone name: {e}"))?,
                path: PathBuf::from(s),
            })
        } else {
            Err(anyhow!(
                "if no zone name is provided, the file name must have the form <NAME>.zone or <NAME>.json",
            ))
        }
    }
}
