// handlers/tenant/mod.rs - Tenant-scoped handlers
//
// The host must resolve to an active tenant; anything else is a 404.
pub mod show;

pub use show::show;
