pub mod models;
pub mod services;

pub use models::{DayWindows, UtcWindow};
pub use services::availability::AvailabilityService;
pub use services::calendar::ScheduleCalendar;
pub use services::recurrence::{RecurrenceExpander, RruleExpander};
pub use services::slots::{expand_busy, SlotIter};
