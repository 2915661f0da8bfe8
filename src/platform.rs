//! Platform scheduling hooks.
//!
//! The video receiver drains ~3.6k packets per second, close to the OS
//! scheduler quantum, so the receive threads ask for elevated priority and
//! the stream requests 1 ms timer resolution while running. All of this is
//! best effort; failures are ignored.

/// Raise the calling thread's scheduling priority.
#[cfg(windows)]
pub fn boost_thread_priority() {
    use windows_sys::Win32::System::Threading::{
        GetCurrentThread, SetThreadPriority, THREAD_PRIORITY_TIME_CRITICAL,
    };
    unsafe {
        SetThreadPriority(GetCurrentThread(), THREAD_PRIORITY_TIME_CRITICAL);
    }
}

#[cfg(unix)]
pub fn boost_thread_priority() {
    // Raise the niceness of this thread only. Needs privileges; harmless
    // when refused.
    unsafe {
        libc::setpriority(libc::PRIO_PROCESS, 0, -10);
    }
}

#[cfg(not(any(windows, unix)))]
pub fn boost_thread_priority() {}

/// Request fine-grained timer resolution for the duration of a stream.
#[cfg(windows)]
pub fn begin_timer_resolution() {
    use windows_sys::Win32::Media::timeBeginPeriod;
    unsafe {
        timeBeginPeriod(1);
    }
}

#[cfg(windows)]
pub fn end_timer_resolution() {
    use windows_sys::Win32::Media::timeEndPeriod;
    unsafe {
        timeEndPeriod(1);
    }
}

#[cfg(not(windows))]
pub fn begin_timer_resolution() {}

#[cfg(not(windows))]
pub fn end_timer_resolution() {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hooks_do_not_panic() {
        boost_thread_priority();
        begin_timer_resolution();
        end_timer_resolution();
    }
}
