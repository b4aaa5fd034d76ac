#![doc = "Periodic task engine: drift-free cycles, ceiling-protected pause state and task bodies."]

pub mod clock;
pub mod launcher;
pub mod pause;
pub mod periodic;
pub mod realtime;
pub mod tasks;

pub use clock::*;
pub use launcher::*;
pub use pause::*;
pub use periodic::*;
pub use realtime::*;
pub use tasks::*;
