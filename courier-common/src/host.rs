//! Host identification used in queue entry names and generated Message-Ids.

use std::sync::OnceLock;

static HOSTNAME: OnceLock<String> = OnceLock::new();

/// The name of this host, looked up once per process.
///
/// Falls back to `localhost` when the name cannot be determined.
pub fn hostname() -> &'static str {
    HOSTNAME.get_or_init(|| lookup().unwrap_or_else(|| "localhost".to_string()))
}

#[cfg(unix)]
fn lookup() -> Option<String> {
    let mut buf = [0u8; 256];

    // SAFETY: `buf` is valid for writes of `buf.len()` bytes for the whole call.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
    if rc != 0 {
        return None;
    }

    let end = buf.iter().position(|b| *b == 0).unwrap_or(buf.len());
    let name = std::str::from_utf8(&buf[..end]).ok()?.trim();

    (!name.is_empty()).then(|| name.to_string())
}

#[cfg(not(unix))]
fn lookup() -> Option<String> {
    std::env::var("COMPUTERNAME")
        .ok()
        .filter(|name| !name.is_empty())
}
