//! Shutdown Signals
//!
//! SIGINT / SIGTERM set a process-wide flag that stream stages and the
//! transform worker poll between items. The handler only stores an atomic,
//! which is async-signal-safe.

use std::sync::atomic::{AtomicBool, Ordering};

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Whether a shutdown signal has been received
pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::Relaxed)
}

/// Install handlers for SIGINT and SIGTERM
#[cfg(unix)]
pub fn install_shutdown_handler() {
    for signal in [libc::SIGINT, libc::SIGTERM] {
        // SAFETY: the handler only touches an atomic; sigaction is given a
        // fully initialised struct.
        unsafe {
            let mut sa: libc::sigaction = std::mem::zeroed();
            sa.sa_sigaction = shutdown_handler as *const () as usize;
            sa.sa_flags = libc::SA_RESTART;
            libc::sigemptyset(&mut sa.sa_mask);
            libc::sigaction(signal, &sa, std::ptr::null_mut());
        }
    }
}

/// Signal setup for a transform worker.
///
/// SIGTERM requests shutdown. SIGINT is ignored: a terminal Ctrl-C reaches
/// the whole process group, and the worker must keep serving while the
/// runner drains in-flight workloads. The runner ends the worker with an
/// explicit shutdown request instead.
#[cfg(unix)]
pub fn install_worker_signal_handlers() {
    // SAFETY: see install_shutdown_handler; SIG_IGN is always a valid disposition.
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = shutdown_handler as *const () as usize;
        sa.sa_flags = libc::SA_RESTART;
        libc::sigemptyset(&mut sa.sa_mask);
        libc::sigaction(libc::SIGTERM, &sa, std::ptr::null_mut());

        libc::signal(libc::SIGINT, libc::SIG_IGN);
    }
}

#[cfg(unix)]
extern "C" fn shutdown_handler(_sig: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::Relaxed);
}

/// No-op on non-Unix
#[cfg(not(unix))]
pub fn install_shutdown_handler() {}

/// No-op on non-Unix
#[cfg(not(unix))]
pub fn install_worker_signal_handlers() {}
