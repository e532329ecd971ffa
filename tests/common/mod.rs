pub mod asserts;
pub mod executors;
pub mod workflows;

pub use asserts::*;
pub use executors::*;
pub use workflows::*;
