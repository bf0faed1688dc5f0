//! Scoped signal observation for the preload copy loop.
//!
//! Preloading a large image can take long enough that the operator may want
//! to abort with Ctrl-C. Handlers for SIGINT/SIGTERM/SIGPIPE are installed
//! that only raise a flag; the copy loop polls the flag between chunks and
//! the previous dispositions are restored when the guard drops, so nothing
//! leaks past the preload phase.

#[cfg(unix)]
pub(crate) use unix::SignalGuard;

#[cfg(unix)]
mod unix {
    use std::mem;
    use std::sync::atomic::{AtomicBool, Ordering};

    static TRIGGERED: AtomicBool = AtomicBool::new(false);

    const SIGNALS: [libc::c_int; 3] = [libc::SIGINT, libc::SIGTERM, libc::SIGPIPE];

    extern "C" fn note_signal(_sig: libc::c_int) {
        TRIGGERED.store(true, Ordering::SeqCst);
    }

    pub(crate) struct SignalGuard {
        saved: [libc::sigaction; 3],
    }

    impl SignalGuard {
        pub(crate) fn install() -> Self {
            TRIGGERED.store(false, Ordering::SeqCst);
            let mut saved: [libc::sigaction; 3] = unsafe { mem::zeroed() };
            unsafe {
                let mut action: libc::sigaction = mem::zeroed();
                action.sa_sigaction = note_signal as usize;
                libc::sigemptyset(&mut action.sa_mask);
                for (i, sig) in SIGNALS.iter().enumerate() {
                    libc::sigaction(*sig, &action, &mut saved[i]);
                }
            }
            Self { saved }
        }

        #[inline]
        pub(crate) fn triggered(&self) -> bool {
            TRIGGERED.load(Ordering::SeqCst)
        }
    }

    impl Drop for SignalGuard {
        fn drop(&mut self) {
            unsafe {
                for (i, sig) in SIGNALS.iter().enumerate() {
                    libc::sigaction(*sig, &self.saved[i], std::ptr::null_mut());
                }
            }
        }
    }

}

#[cfg(not(unix))]
pub(crate) use fallback::SignalGuard;

#[cfg(not(unix))]
mod fallback {
    pub(crate) struct SignalGuard;

    impl SignalGuard {
        pub(crate) fn install() -> Self {
            SignalGuard
        }

        #[inline]
        pub(crate) fn triggered(&self) -> bool {
            false
        }
    }
}
