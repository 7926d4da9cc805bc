pub mod memory;

pub use memory::{Dataset, MemoryExecutor, MemoryTable};
