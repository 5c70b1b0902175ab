pub mod migrate;
pub mod onboard;
pub mod sweep;
pub mod tenant;
