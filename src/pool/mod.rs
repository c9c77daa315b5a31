mod frame;
mod pool;

pub use frame::FixedPage;
pub use pool::{BufferPool, PoolOptions, PoolStats};
