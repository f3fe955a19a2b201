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

//! Network I/O for running a [`Server`](crate::server::Server).
//!
//! The [`Server`](crate::server::Server) implements query processing
//! abstracted from network I/O. This module supplies the rest: the
//! [`codec`] between wire messages and the server's object model, the
//! [`DnsListener`] that serves UDP and TCP clients on a Tokio runtime,
//! and [`UdpUpstream`], which forwards recursive queries.

use std::time::Duration;

pub mod codec;
mod listener;
pub(crate) mod shutdown;
mod upstream;

pub use listener::DnsListener;
pub(crate) use listener::run_with_respawning;
pub use shutdown::ShutdownController;
pub use upstream::UdpUpstream;

/// How long a TCP client has to send a complete message before the
/// connection is closed.
const READ_MESSAGE_TIMEOUT: Duration = Duration::from_secs(5);
