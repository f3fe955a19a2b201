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

//! Graceful shutdown of spawned Tokio tasks.

use tokio::sync::{broadcast, mpsc};

/// Controls the shutdown of a group of Tokio tasks.
///
/// Use [`ShutdownController::shut_down`] or its blocking variant,
/// [`ShutdownController::blocking_shut_down`], to initiate shutdown and
/// wait for its completion. Dropping the controller also triggers
/// shutdown, but does not wait for it to complete.
#[must_use]
pub struct ShutdownController {
    request_sender: broadcast::Sender<()>,
    wait_receiver: mpsc::Receiver<()>,
}

impl ShutdownController {
    /// Creates a controller together with the first handle attached to
    /// it.
    pub(crate) fn new() -> (Self, ShutdownHandle) {
        let (request_sender, request_receiver) = broadcast::channel(1);
        let (wait_sender, wait_receiver) = mpsc::channel(1);
        let controller = Self {
            request_sender,
            wait_receiver,
        };
        let handle = ShutdownHandle {
            request_receiver,
            wait_sender,
        };
        (controller, handle)
    }

    /// Requests that the tasks shut down, and then waits for them to
    /// terminate.
    pub async fn shut_down(mut self) {
        drop(self.request_sender);
        let _ = self.wait_receiver.recv().await;
    }

    /// The blocking variant of [`ShutdownController::shut_down`].
    pub fn blocking_shut_down(mut self) {
        drop(self.request_sender);
        let _ = self.wait_receiver.blocking_recv();
    }
}

/// A handle held by tasks to interact with the shutdown mechanism.
///
/// The shutdown signal is the closing of the broadcast channel, not a
/// value sent on it. Shutdown completes once every handle (or at least
/// every `wait_sender`) has been dropped.
pub(crate) struct ShutdownHandle {
    request_receiver: broadcast::Receiver<()>,
    pub(crate) wait_sender: mpsc::Sender<()>,
}

impl ShutdownHandle {
    /// Resolves once shutdown has been requested.
    pub(crate) async fn requested(&mut self) {
        while self.request_receiver.recv().await.is_ok() {}
    }

    /// Returns whether shutdown has been requested, without waiting.
    pub(crate) fn is_requested(&mut self) -> bool {
        matches!(
            self.request_receiver.try_recv(),
            Err(broadcast::error::TryRecvError::Closed)
        )
    }
}

impl Clone for ShutdownHandle {
    fn clone(&self) -> Self {
        // A resubscribed receiver misses values already queued, which
        // does not matter since no values are ever sent.
        Self {
            request_receiver: self.request_receiver.resubscribe(),
            wait_sender: self.wait_sender.clone(),
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
