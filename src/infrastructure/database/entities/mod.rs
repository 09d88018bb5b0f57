//! Sea-ORM entity definitions
//!
//! These map our domain models to database tables.

pub mod report;

// Re-export the entity and active model for easy access
pub use report::Entity as Report;
pub use report::ActiveModel as ReportActive;
