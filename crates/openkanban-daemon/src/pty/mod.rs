pub mod manager;

pub use manager::{ManagedPty, PtySpawnSpec};
