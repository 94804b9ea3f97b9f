//! Media session bookkeeping and the in-process SFU

mod manager;
mod memory;

pub use manager::{MediaSessionManager, MediaStats};
pub use memory::MemorySfu;
