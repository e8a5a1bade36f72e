use uuid::Uuid;

/// Default channel namespace.
pub const DEFAULT_CHANNEL_PREFIX: &str = "redis-rpc";

/// Request channel shared by every server listening on `logical`.
pub fn request_channel(prefix: &str, logical: &str) -> String {
    format!("{prefix}:request:{logical}")
}

/// Response channel owned by exactly one client.
///
/// Unique per call: host name, process id, and a 32-hex random token keep
/// concurrent clients (and restarted processes) from colliding.
pub fn response_channel(prefix: &str) -> String {
    let host = gethostname::gethostname().to_string_lossy().into_owned();
    let pid = std::process::id();
    let token = Uuid::new_v4().simple();
    format!("{prefix}:response:{host}:{pid}:{token}")
}
