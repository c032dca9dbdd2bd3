pub mod job;
pub mod organization;
pub mod plan;
pub mod usage;
pub mod webhook_event;
