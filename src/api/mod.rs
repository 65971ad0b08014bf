// =============================================================================
// API Module — observability + external write interfaces
// =============================================================================

pub mod rest;
