//! Cooperative cancellation for an optimization run
//!
//! The controller is a shared flag. The engine reads it only between trials;
//! a trial in flight always runs to completion. `InterruptGuard` routes Ctrl+C
//! into the flag for as long as it is alive. Once no guard is alive, Ctrl+C
//! terminates the process again.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{info, warn};

/// Exit status of a process terminated by Ctrl+C
const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Guards currently routing Ctrl+C into a controller
static ACTIVE_GUARDS: AtomicUsize = AtomicUsize::new(0);

/// Listener left behind by the last dropped guard; it applies the default action
static FALLBACK_LISTENER: Mutex<Option<AbortHandle>> = Mutex::new(None);

#[cfg(unix)]
type InterruptSignal = tokio::signal::unix::Signal;

#[cfg(unix)]
fn register_interrupt() -> std::io::Result<InterruptSignal> {
    tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
}

#[cfg(windows)]
type InterruptSignal = tokio::signal::windows::CtrlC;

#[cfg(windows)]
fn register_interrupt() -> std::io::Result<InterruptSignal> {
    tokio::signal::windows::ctrl_c()
}

/// What a listener does with one Ctrl+C
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignalAction {
    /// Stop at the next trial boundary
    Request,
    /// Terminate the process
    Exit,
    /// Another live guard handles it
    Ignore,
}

/// `presses` counts signals seen while this listener's guard was alive,
/// including the current one.
fn signal_action(armed: bool, presses: usize, active_guards: usize) -> SignalAction {
    if armed {
        if presses <= 1 {
            SignalAction::Request
        } else {
            SignalAction::Exit
        }
    } else if active_guards == 0 {
        SignalAction::Exit
    } else {
        SignalAction::Ignore
    }
}

/// Thread-safe interruption flag shared between the signal listener and the engine
#[derive(Debug, Clone, Default)]
pub struct InterruptionController {
    flag: Arc<AtomicBool>,
}

impl InterruptionController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the engine to stop at the next trial boundary.
    pub fn request(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    /// Route Ctrl+C into this controller until the returned guard is dropped.
    ///
    /// The signal is registered before this returns. Must be called from
    /// within a tokio runtime.
    pub fn install_signal_guard(&self) -> InterruptGuard {
        let mut signal = match register_interrupt() {
            Ok(signal) => signal,
            Err(e) => {
                warn!(error = %e, "Unable to listen for Ctrl+C; interruption disabled");
                return InterruptGuard {
                    armed: Arc::new(AtomicBool::new(false)),
                    listener: None,
                };
            }
        };

        ACTIVE_GUARDS.fetch_add(1, Ordering::SeqCst);
        let armed = Arc::new(AtomicBool::new(true));
        let listener_armed = armed.clone();
        let controller = self.clone();

        let listener = tokio::spawn(async move {
            let mut presses = 0usize;
            while signal.recv().await.is_some() {
                let armed = listener_armed.load(Ordering::SeqCst);
                if armed {
                    presses += 1;
                }
                match signal_action(armed, presses, ACTIVE_GUARDS.load(Ordering::SeqCst)) {
                    SignalAction::Request => {
                        info!(
                            "Ctrl+C received, stopping after the current trial (press again to abort)"
                        );
                        controller.request();
                    }
                    SignalAction::Exit => {
                        if armed {
                            warn!("Second Ctrl+C received, exiting immediately");
                        }
                        std::process::exit(INTERRUPTED_EXIT_CODE);
                    }
                    SignalAction::Ignore => {}
                }
            }
        });

        InterruptGuard {
            armed,
            listener: Some(listener),
        }
    }
}

/// Scoped Ctrl+C routing. Dropping it, whether the run finished normally or
/// unwound, hands Ctrl+C back to the default action: terminate with status 130.
pub struct InterruptGuard {
    armed: Arc<AtomicBool>,
    listener: Option<JoinHandle<()>>,
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        let Some(listener) = self.listener.take() else {
            return;
        };
        self.armed.store(false, Ordering::SeqCst);
        ACTIVE_GUARDS.fetch_sub(1, Ordering::SeqCst);

        // Keep exactly one disarmed listener as the process-wide fallback
        let previous = match FALLBACK_LISTENER.lock() {
            Ok(mut slot) => slot.replace(listener.abort_handle()),
            Err(_) => None,
        };
        if let Some(previous) = previous {
            previous.abort();
        }
    }
}
