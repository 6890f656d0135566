// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Cooperative stop signal for running batches.

use tokio::sync::watch;

/// Sending half: trips the signal for every clone of the paired [`StopSignal`].
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: watch::Sender<bool>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }
}

/// Receiving half, checked between retry attempts and inside the streaming loop.
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

/// Create a connected stop handle and signal.
pub fn stop_channel() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (StopHandle { tx }, StopSignal { rx })
}

impl StopSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        stop_channel().1
    }

    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the signal is tripped. Never resolves if the handle is
    /// dropped without stopping.
    pub async fn stopped(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|stopped| *stopped).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
