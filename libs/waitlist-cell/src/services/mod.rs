pub mod confirmation;
pub mod matcher;
pub mod queue;
pub mod worker;
