pub mod availability;
pub mod calendar;
pub mod recurrence;
pub mod slots;
