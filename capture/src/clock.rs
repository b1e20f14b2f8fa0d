//! Capture clock
//!
//! Every timestamp in a capture comes from one clock, chosen once at startup by
//! probing a fixed list of clock ids and keeping the first one the kernel
//! accepts. The chosen `Clock` is a plain value and is copied into each writer.

use std::fmt;

/// Probe order, most precise monotonic source first.
const CANDIDATES: &[(libc::clockid_t, &str)] = &[
    (libc::CLOCK_MONOTONIC, "monotonic"),
    (libc::CLOCK_MONOTONIC_RAW, "monotonic-raw"),
    (libc::CLOCK_MONOTONIC_COARSE, "monotonic-coarse"),
    (libc::CLOCK_REALTIME_COARSE, "realtime-coarse"),
    (libc::CLOCK_REALTIME, "realtime"),
];

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Clock {
    id: libc::clockid_t,
    name: &'static str,
}

impl Clock {
    /// Select the first clock source that `clock_gettime` accepts.
    pub fn probe() -> Self {
        for &(id, name) in CANDIDATES {
            if read_clock(id).is_some() {
                tracing::debug!(clock = name, "Selected capture clock");
                return Self { id, name };
            }
        }

        // CLOCK_REALTIME is mandatory on every POSIX system
        Self {
            id: libc::CLOCK_REALTIME,
            name: "realtime",
        }
    }

    /// The raw clock id passed to `clock_gettime`.
    pub fn id(&self) -> libc::clockid_t {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Current time in nanoseconds.
    pub fn now(&self) -> i64 {
        read_clock(self.id).unwrap_or(0)
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::probe()
    }
}

impl fmt::Debug for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Clock")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

fn read_clock(id: libc::clockid_t) -> Option<i64> {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: ts is a valid, writable timespec for the duration of the call.
    let rc = unsafe { libc::clock_gettime(id, &mut ts) };
    if rc != 0 {
        return None;
    }
    Some(ts.tv_sec as i64 * 1_000_000_000 + ts.tv_nsec as i64)
}
