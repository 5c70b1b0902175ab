// handlers/mod.rs - Handlers by tenant scope
//
// Public (any host, no tenant needed) and tenant-scoped (host must resolve to
// an active tenant). Both tiers receive the RequestTenant extension from
// middleware::tenant.
pub mod public;
pub mod tenant;
