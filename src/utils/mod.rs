pub mod bandwidth;
pub mod progress;
