//! Interrupt handling for training runs.
//!
//! The first SIGINT/SIGTERM (Ctrl+C elsewhere) sets a shared flag. The training
//! loop polls the flag between steps, so the step in flight always completes.

use log::{error, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

/// Shared "please stop" flag, set at most once per run
#[derive(Clone, Debug, Default)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Spawns a watcher thread that sets the returned flag on the first shutdown signal.
pub fn install_interrupt_handler() -> std::io::Result<InterruptFlag> {
    let flag = InterruptFlag::new();
    let watcher = flag.clone();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    thread::Builder::new()
        .name("interrupt-watcher".to_string())
        .spawn(move || {
            if runtime.block_on(wait_for_shutdown_signal()) {
                warn!("Interrupt received, finishing the current step before shutdown");
                watcher.set();
            }
        })?;

    Ok(flag)
}

/// Resolves to `true` once SIGTERM or SIGINT arrives, `false` if no handler could be registered.
async fn wait_for_shutdown_signal() -> bool {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to register SIGTERM handler: {}", e);
                return false;
            }
        };
        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to register SIGINT handler: {}", e);
                return false;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
        true
    }

    #[cfg(not(unix))]
    {
        match tokio::signal::ctrl_c().await {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to listen for Ctrl+C: {}", e);
                false
            }
        }
    }
}
