//! Stable process exit codes.

/// Session ended normally (`quit` or end of input).
pub const OK: i32 = 0;
/// Unrecoverable runtime failure, e.g. the terminal could not be read.
pub const FAILURE: i32 = 1;
/// Invalid config file or missing credential; reported before any input is read.
pub const CONFIG_ERROR: i32 = 2;
