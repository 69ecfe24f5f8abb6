pub mod allocator;
pub mod model;

pub use allocator::NetworkAllocator;
pub use model::{AllocationRequest, NetworkAllocation, NetworkTable, ReleasedSlot};
