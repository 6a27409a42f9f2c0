pub mod allocator;
pub mod assignment;
pub mod balance;
pub mod commands;
pub mod expiry;
pub mod ledger;
pub mod meters;
pub mod packages;
pub mod types;

pub use allocator::{
    Allocation, AllocationInput, ConsumptionAllocator, EffectiveState, ExtraMeterUsage,
    PackageAllocation, UsageAnomaly,
};
pub use assignment::{AssignmentOutcome, CheckoutSummary, MeterAssignmentManager, MeterMove};
pub use balance::{BalanceSignal, LowBalanceMonitor, PowerGuard};
pub use commands::{PowerCommand, PowerCommandIssuer, ShutdownEvent};
pub use expiry::{ExpiryEvaluator, ExpiryState};
pub use ledger::{BalanceStatement, LedgerService};
pub use meters::{Booking, ExtraMeter, MeterAssignment, MeterReading, MeterRecord};
pub use packages::{Package, PackageLimits, PackageRequest};
pub use types::{
    BookingNumber, CustomerKind, Kwh, MeterId, OrganizationId, PackageCategory, PackageId,
    PackageStatus, PowerState, ShutdownReason,
};
