//! Shutdown coordination between signal delivery and the event loop.
//!
//! SIGINT and SIGTERM handlers only store the signal number in a static
//! atomic. The handlers are installed without `SA_RESTART`, so a blocked
//! readiness wait returns `EINTR` and the loop observes the flag on its
//! next check. Test builds can also stop a server through a
//! `ShutdownHandle`, which wakes the poll with a `mio::Waker`.

#[cfg(test)]
use mio::Waker;
use std::io;
#[cfg(test)]
use std::sync::atomic::AtomicBool;
use std::sync::atomic::{AtomicI32, Ordering};
#[cfg(test)]
use std::sync::Arc;

/// Last termination signal received, 0 if none.
static SIGNALLED: AtomicI32 = AtomicI32::new(0);

extern "C" fn on_terminate(signum: libc::c_int) {
    SIGNALLED.store(signum, Ordering::SeqCst);
}

/// Route SIGINT and SIGTERM to the process-wide shutdown flag.
pub fn install_signal_handlers() -> io::Result<()> {
    for signum in [libc::SIGINT, libc::SIGTERM] {
        // SAFETY: the handler only performs an atomic store, which is
        // async-signal-safe, and `action` is fully initialised below.
        let rc = unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = on_terminate as extern "C" fn(libc::c_int) as libc::sighandler_t;
            action.sa_flags = 0;
            libc::sigemptyset(&mut action.sa_mask);
            libc::sigaction(signum, &action, std::ptr::null_mut())
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

fn signalled() -> Option<i32> {
    match SIGNALLED.load(Ordering::SeqCst) {
        0 => None,
        signum => Some(signum),
    }
}

/// Why the server is shutting down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cause {
    /// A termination signal was delivered.
    Signal(i32),
    /// A `ShutdownHandle` was triggered.
    #[cfg(test)]
    Requested,
}

/// Lifecycle of the event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Running,
    ShuttingDown,
    Terminated,
}

/// Shutdown state owned by one event loop.
pub struct Shutdown {
    observe_signals: bool,
    phase: Phase,
    #[cfg(test)]
    requested: Option<Arc<AtomicBool>>,
}

impl Shutdown {
    /// Shutdown driven by SIGINT/SIGTERM.
    pub fn on_signals() -> Self {
        Self {
            observe_signals: true,
            phase: Phase::Running,
            #[cfg(test)]
            requested: None,
        }
    }

    /// Shutdown driven only by the returned handle, ignoring signals.
    #[cfg(test)]
    pub fn with_handle(waker: Waker) -> (Self, ShutdownHandle) {
        let requested = Arc::new(AtomicBool::new(false));
        let shutdown = Self {
            observe_signals: false,
            phase: Phase::Running,
            requested: Some(Arc::clone(&requested)),
        };
        let handle = ShutdownHandle {
            requested,
            waker: Arc::new(waker),
        };
        (shutdown, handle)
    }

    /// Check whether shutdown was requested.
    pub fn cause(&self) -> Option<Cause> {
        if self.observe_signals {
            if let Some(signum) = signalled() {
                return Some(Cause::Signal(signum));
            }
        }
        self.requested()
    }

    #[cfg(test)]
    fn requested(&self) -> Option<Cause> {
        self.requested
            .as_ref()
            .filter(|requested| requested.load(Ordering::SeqCst))
            .map(|_| Cause::Requested)
    }

    #[cfg(not(test))]
    fn requested(&self) -> Option<Cause> {
        None
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn begin(&mut self) {
        debug_assert_eq!(self.phase, Phase::Running);
        self.phase = Phase::ShuttingDown;
    }

    pub fn finish(&mut self) {
        debug_assert_eq!(self.phase, Phase::ShuttingDown);
        self.phase = Phase::Terminated;
    }
}

/// Cloneable, thread-safe trigger for a server's shutdown.
#[cfg(test)]
#[derive(Clone)]
pub struct ShutdownHandle {
    requested: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

#[cfg(test)]
impl ShutdownHandle {
    /// Request shutdown and wake the event loop.
    pub fn trigger(&self) -> io::Result<()> {
        self.requested.store(true, Ordering::SeqCst);
        self.waker.wake()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::{Events, Poll, Token};
    use std::time::Duration;

    #[test]
    fn test_handle_trips_flag_and_wakes() {
        let mut poll = Poll::new().unwrap();
        let waker = Waker::new(poll.registry(), Token(7)).unwrap();
        let (shutdown, handle) = Shutdown::with_handle(waker);
        assert_eq!(shutdown.cause(), None);

        handle.trigger().unwrap();
        assert_eq!(shutdown.cause(), Some(Cause::Requested));

        let mut events = Events::with_capacity(4);
        poll.poll(&mut events, Some(Duration::from_secs(5))).unwrap();
        assert!(events.iter().any(|e| e.token() == Token(7)));
    }

    #[test]
    fn test_phase_transitions() {
        let mut shutdown = Shutdown::on_signals();

        assert_eq!(shutdown.phase(), Phase::Running);
        shutdown.begin();
        assert_eq!(shutdown.phase(), Phase::ShuttingDown);
        shutdown.finish();
        assert_eq!(shutdown.phase(), Phase::Terminated);
    }

    #[test]
    fn test_signal_sets_process_flag() {
        install_signal_handlers().unwrap();
        // SAFETY: the handler installed above only stores to an atomic.
        unsafe {
            libc::raise(libc::SIGTERM);
        }
        assert_eq!(signalled(), Some(libc::SIGTERM));
        assert_eq!(
            Shutdown::on_signals().cause(),
            Some(Cause::Signal(libc::SIGTERM))
        );

        // Handle-driven servers ignore the process flag
        let poll = Poll::new().unwrap();
        let waker = Waker::new(poll.registry(), Token(0)).unwrap();
        let (shutdown, _handle) = Shutdown::with_handle(waker);
        assert_eq!(shutdown.cause(), None);
    }
}
