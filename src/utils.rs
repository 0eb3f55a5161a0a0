//! Shared utility helpers.

use std::path::PathBuf;

use tracing::debug;

/// Where openclaw writes session transcripts:
/// `$HOME/.openclaw/agents/main/sessions`.
pub fn default_sessions_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".openclaw")
        .join("agents")
        .join("main")
        .join("sessions")
}

/// Hand freed heap pages back to the OS.
///
/// Only glibc exposes `malloc_trim`; elsewhere this just logs.
pub fn reclaim_memory(name: &str) {
    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    {
        // SAFETY: malloc_trim only walks allocator arenas and takes no
        // pointers from us.
        let released = unsafe { libc::malloc_trim(0) };
        debug!(monitor = name, released = released != 0, "gc: malloc_trim");
    }
    #[cfg(not(all(target_os = "linux", target_env = "gnu")))]
    debug!(monitor = name, "gc: nothing to trim on this platform");
}
