// Presentation layer - Console surface and dependency wiring
pub mod app_state;
pub mod console;
