mod reaper;
mod storage;

pub use reaper::LeaseReaper;
pub use storage::MemoryBackend;
