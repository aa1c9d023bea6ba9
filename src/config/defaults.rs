pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 50;
pub const MAX_WRITE_TIMEOUT_MS: u64 = 10_000;

pub const DEFAULT_REPLY_TIMEOUT_MS: u64 = 5_000;
pub const MIN_REPLY_TIMEOUT_MS: u64 = 10;
pub const MAX_REPLY_TIMEOUT_MS: u64 = 600_000;

pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 500;
pub const MAX_SHUTDOWN_GRACE_MS: u64 = 10_000;
