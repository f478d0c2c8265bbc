//! # Database Queue Infrastructure
//!
//! Multi-queue architecture for database operations. Each database gets one
//! Lead queue that establishes the connection, runs bootstrap and
//! migrations, and spawns priority-tiered worker queues (slow, medium,
//! fast, cache). Every queue - Lead or worker - is the same structure: one
//! worker task, one FIFO, one exclusively owned persistent connection, and
//! a heartbeat that keeps the connection alive.

pub mod core;
pub mod heartbeat;
pub mod lead;
pub mod worker;

pub use self::core::{
    queue_allocation_count, queue_deallocation_count, ConductorState, DatabaseQueue,
};
pub use self::lead::{shutdown_child_queue, spawn_child_queue};
