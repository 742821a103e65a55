pub mod apps;
pub mod builds;
pub mod signing;
