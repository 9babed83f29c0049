//! Process exit codes, following sysexits.h where applicable

/// General error
pub const ERROR: i32 = 1;

/// IO error - cache directory unusable
pub const IO_ERROR: i32 = 74;

/// Configuration error - no usable cluster configuration
pub const CONFIG_ERROR: i32 = 78;
