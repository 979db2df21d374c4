// Core services
pub mod repair_orders;

// Content management
pub mod blog;
