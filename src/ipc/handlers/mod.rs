pub mod backup_exchange;
pub mod bulletins;
pub mod core;
pub mod dashboard;
pub mod enrollments;
pub mod grades;
pub mod payments;
pub mod schedules;
pub mod setup;
pub mod students;
pub mod teachers;
