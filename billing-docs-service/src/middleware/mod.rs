pub mod signer;
pub mod tenant;

pub use tenant::TenantContext;
