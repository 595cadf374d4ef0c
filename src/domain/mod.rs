// Domain layer - Models and pure algorithms, no I/O
pub mod collector;
pub mod credentials;
pub mod downsampler;
pub mod events;
pub mod prediction;
pub mod rolling_window;
pub mod sample;
pub mod subscription;
