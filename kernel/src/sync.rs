pub mod intr;
pub mod mutex;

pub use self::mutex::{Mutex, MutexGuard};
