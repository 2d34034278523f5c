//! 预约分配模块
//!
//! 后台调度循环、多设备全有或全无的锁定协议，以及已生效预约的释放

pub mod allocation;
pub mod backoff;
pub mod lock;
pub mod release;
pub mod service;
pub mod submit;

pub use allocation::{ApplyOutcome, HoldOutcome, ReservationAllocator};
pub use backoff::ReconnectBackoff;
pub use lock::{LockProcedure, procedure_for};
pub use release::release_applied_reservation;
pub use service::{ReservationService, SchedulerSettings, ServiceHandle, StaticSettings};
pub use submit::{submit_reservation, validate_reservation};
