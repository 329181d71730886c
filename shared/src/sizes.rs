pub const KB: usize = 1024;
pub const MB: usize = KB * KB;
pub const GB: usize = MB * KB;

// The swapfile is 9MB, as on the reference board configuration.
pub const SWAP_SIZE: usize = 9 * MB;
