pub mod onboarding;
pub mod tenant_admin;

pub use onboarding::{
    FailureClass, OnboardedTenant, OnboardingError, OnboardingStep, ProvisioningOrchestrator, ProvisioningRequest,
    StepTimeouts,
};
pub use tenant_admin::{SweepReport, TenantAdminService};
