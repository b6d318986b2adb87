pub mod analysis;
pub mod integration;
pub mod job;
