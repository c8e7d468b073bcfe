//! Background maintenance thread.
//!
//! Each tick rolls back expired transactions and drops idle read sessions.
//! The thread sleeps on a condition variable so that stopping it does not
//! wait out the interval.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::context::RepositoryContext;
use crate::error::{KernelError, KernelResult};
use crate::manager::TransactionManager;

#[derive(Default)]
struct Signal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

/// Handle to the running sweeper. Dropping it stops the thread.
pub struct Sweeper {
    signal: Arc<Signal>,
    handle: Option<JoinHandle<()>>,
}

impl Sweeper {
    /// Start sweeping `transactions` and the read sessions of `ctx` every
    /// `interval`.
    pub fn spawn(
        interval: Duration,
        ctx: Arc<RepositoryContext>,
        transactions: Arc<TransactionManager>,
    ) -> KernelResult<Self> {
        if interval.is_zero() {
            return Err(KernelError::Config("sweep interval must be positive".into()));
        }
        let signal = Arc::new(Signal::default());
        let thread_signal = signal.clone();
        let handle = thread::Builder::new()
            .name("quire-sweeper".into())
            .spawn(move || run(&thread_signal, interval, &ctx, &transactions))
            .map_err(|e| KernelError::Runtime(format!("failed to start sweeper: {e}")))?;
        info!(interval_ms = interval.as_millis() as u64, "sweeper started");
        Ok(Self {
            signal,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the thread and wait for it to exit.
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        match self.signal.stopped.lock() {
            Ok(mut stopped) => *stopped = true,
            Err(poisoned) => *poisoned.into_inner() = true,
        }
        self.signal.wake.notify_all();
        if handle.join().is_err() {
            warn!("sweeper thread panicked");
        } else {
            debug!("sweeper stopped");
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(signal: &Signal, interval: Duration, ctx: &RepositoryContext, transactions: &TransactionManager) {
    loop {
        let Ok(stopped) = signal.stopped.lock() else {
            return;
        };
        let Ok((stopped, _)) = signal.wake.wait_timeout_while(stopped, interval, |stopped| !*stopped) else {
            return;
        };
        if *stopped {
            return;
        }
        drop(stopped);
        sweep_once(ctx, transactions);
    }
}

fn sweep_once(ctx: &RepositoryContext, transactions: &TransactionManager) {
    match transactions.sweep() {
        Ok(0) => {}
        Ok(rolled_back) => info!(rolled_back, "expired transactions rolled back"),
        Err(e) => warn!(error = %e, "transaction sweep failed"),
    }
    match ctx.reader.evict_idle() {
        Ok(0) => {}
        Ok(evicted) => debug!(evicted, "idle read sessions evicted"),
        Err(e) => warn!(error = %e, "read session eviction failed"),
    }
}
