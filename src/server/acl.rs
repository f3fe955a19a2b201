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

//! Access control for recursion.

use std::net::IpAddr;

use ipnetwork::IpNetwork;

/// A named access rule: which networks it covers and whether they may
/// have queries for unserved names forwarded on their behalf.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AclRule {
    pub name: String,
    pub networks: Vec<IpNetwork>,
    pub recursion: bool,
}

/// An ordered list of [`AclRule`]s. The first rule covering a source
/// address decides; addresses no rule covers are denied recursion.
#[derive(Clone, Debug, Default)]
pub struct Acl {
    rules: Vec<AclRule>,
}

impl Acl {
    pub fn new(rules: Vec<AclRule>) -> Self {
        Self { rules }
    }

    /// Returns the first rule covering `source`.
    pub fn matching_rule(&self, source: IpAddr) -> Option<&AclRule> {
        let source = canonical(source);
        self.rules
            .iter()
            .find(|rule| rule.networks.iter().any(|network| network.contains(source)))
    }

    /// Returns whether `source` may recurse.
    pub fn allows_recursion(&self, source: IpAddr) -> bool {
        self.matching_rule(source).map_or(false, |rule| rule.recursion)
    }
}

/// Unwraps IPv4-mapped IPv6 addresses, as seen on dual-stack sockets.
fn canonical(address: IpAddr) -> IpAddr {
    match address {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(address, IpAddr::V4),
        IpAddr::V4(_) => address,
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
