use std::io;

/// Pins the calling thread to `core_id`.
///
/// Meant to be called once, before a thread enters its polling loop. A
/// failure here usually means the core does not exist or is outside the
/// process's cpuset; callers should abort startup rather than retry.
#[cfg(target_os = "linux")]
pub fn pin(core_id: usize) -> io::Result<()> {
    if core_id >= libc::CPU_SETSIZE as usize {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("core {core_id} is beyond CPU_SETSIZE"),
        ));
    }

    // SAFETY: cpu_set_t is plain data; CPU_ZERO/CPU_SET only touch the set
    // we own, and pid 0 means the calling thread.
    let rc = unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(core_id, &mut set);
        libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set)
    };

    if rc != 0 {
        let err = io::Error::last_os_error();
        tracing::warn!(core_id, error = %err, "failed to pin thread");
        return Err(err);
    }
    tracing::debug!(core_id, "pinned thread");
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn pin(core_id: usize) -> io::Result<()> {
    tracing::warn!(core_id, "thread pinning not supported on this platform");
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "thread pinning is only implemented on linux",
    ))
}

/// Number of cores the process may run on, if the OS reports it.
pub fn available_cores() -> Option<usize> {
    std::thread::available_parallelism().ok().map(|n| n.get())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(target_os = "linux")]
    #[test]
    fn pin_to_an_allowed_core() {
        // Core 0 may be outside a restricted cpuset; pick one we already run on.
        let core = unsafe {
            let mut set: libc::cpu_set_t = std::mem::zeroed();
            libc::sched_getaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &mut set);
            (0..libc::CPU_SETSIZE as usize)
                .find(|&c| libc::CPU_ISSET(c, &set))
                .unwrap()
        };
        std::thread::spawn(move || pin(core).unwrap()).join().unwrap();
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn pin_out_of_range_fails() {
        assert!(pin(usize::MAX).is_err());
    }

    #[test]
    fn reports_some_cores() {
        assert!(available_cores().unwrap_or(1) >= 1);
    }
}
