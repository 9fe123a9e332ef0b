pub mod pool;

pub use pool::{FrameBufferPool, PoolStats};
