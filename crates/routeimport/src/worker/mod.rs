pub mod chain;
pub mod pool;

pub use chain::{BatchChain, ChainQueue, ChainResult, ChainRunner};
pub use pool::WorkerPool;
