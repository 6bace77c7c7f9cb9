pub mod storage;
pub mod wheel;

pub use storage::MemoryTopicQueue;
pub use wheel::{Placement, Wheel, WHEEL_SIZE};
