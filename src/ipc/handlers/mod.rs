pub mod assignments;
pub mod classrooms;
pub mod core;
pub mod curriculum;
pub mod progress;
pub mod setup;
