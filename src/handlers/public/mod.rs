// handlers/public/mod.rs - Public handlers (no tenant required)
//
// Served on every host, including the apex and www.
pub mod health;
pub mod root;
pub mod signup;

pub use health::health;
pub use root::root;
pub use signup::signup;
