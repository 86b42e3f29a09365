pub mod duplicate_detection;
pub mod invoice_lifecycle;
pub mod lease_pointers;
pub mod next_due;
pub mod payment_validation;
pub mod rent_allocation;
pub mod rent_coverage;
pub mod scheduler;
