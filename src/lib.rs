// Power monitor client - Authenticated REST access, live stream and chart buffers
pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod presentation;
