//! 存储模块
//!
//! 设备、预约队列和已生效预约的存储接口，以及内存实现

mod traits;
mod memory;

pub use traits::{AppliedReservationStore, Connectivity, DeviceStore, ReservationQueueStore, Store};
pub use memory::{MemoryStore, WriteFault};
