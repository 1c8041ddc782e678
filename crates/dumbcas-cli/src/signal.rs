//! Interrupt handling for both commands.
//!
//! The OS handler does the minimum a signal context allows: flip one
//! process-wide flag. A watcher thread turns that flag into a cancellation
//! token the core can select on. Handlers deregister themselves after the
//! first delivery, leaving the default disposition in place, so an impatient
//! second Ctrl-C ends the process without waiting for the pipeline to drain.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dumbcas_core::cancel::{cancellation, CancelToken};

/// Flipped once by the first SIGINT/SIGTERM (or console control event).
pub static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// How often the watcher thread re-checks [`INTERRUPTED`].
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Bridge the interrupt flag to a cancellation token. A watcher thread
/// drops the handle, cancelling every token clone, once the first signal
/// arrives.
pub fn cancel_token() -> CancelToken {
    let (handle, token) = cancellation();
    std::thread::spawn(move || {
        while !INTERRUPTED.load(Ordering::SeqCst) {
            std::thread::sleep(POLL_INTERVAL);
        }
        handle.cancel();
    });
    token
}

#[cfg(unix)]
pub fn install_signal_handlers() {
    extern "C" fn on_signal(signum: libc::c_int) {
        INTERRUPTED.store(true, Ordering::SeqCst);
        // One shot: put the default disposition back.
        unsafe {
            libc::signal(signum, libc::SIG_DFL);
        }
    }

    for signum in [libc::SIGINT, libc::SIGTERM] {
        // Safety: the handler touches nothing but an atomic store and an
        // async-signal-safe libc::signal call.
        unsafe {
            libc::signal(signum, on_signal as *const () as libc::sighandler_t);
        }
    }
}

#[cfg(not(any(unix, windows)))]
pub fn install_signal_handlers() {}

#[cfg(windows)]
pub fn install_signal_handlers() {
    use windows_sys::Win32::System::Console::SetConsoleCtrlHandler;

    unsafe extern "system" fn on_ctrl_event(event: u32) -> i32 {
        // Ctrl-C, Ctrl-Break, and console close are all "stop now".
        if event > 2 {
            return 0;
        }
        INTERRUPTED.store(true, Ordering::SeqCst);
        // One shot: deregister so the next event takes the default path.
        SetConsoleCtrlHandler(Some(on_ctrl_event), 0);
        1
    }

    unsafe {
        SetConsoleCtrlHandler(Some(on_ctrl_event), 1);
    }
}
