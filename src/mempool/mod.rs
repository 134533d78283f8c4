pub mod pool;

pub use pool::{Mempool, MempoolError, MempoolMetrics};
