pub mod models;
pub mod services;

pub use models::{
    BookingRequest, FreedSlot, OccurrenceOutcome, OccurrenceResult, SeriesBookingRequest,
};
pub use services::booking::{BookingService, SlotReleaseSink};
pub use services::lifecycle::LifecycleService;
