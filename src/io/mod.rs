/// CSV export of setpoints.
pub mod export;
