//! Split receiver/processor delivery for the serverless deployment shape.
//!
//! The receiver verifies and acks Slack Events API deliveries fast, pushing
//! each mention onto a task queue; the processor consumes queue deliveries
//! with the queue's long execution budget, insulating Slack's retry timer
//! from generation latency.

pub mod processor;
pub mod queue;
pub mod receiver;
pub mod signature;
