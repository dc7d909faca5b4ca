pub mod attendance;
pub mod backup;
pub mod core;
pub mod enrollments;
pub mod normatives;
pub mod payments;
pub mod sections;
pub mod semesters;
pub mod stats;
pub mod users;
