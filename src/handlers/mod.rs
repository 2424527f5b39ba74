pub mod health;
pub mod diagnostics;
pub mod preview;

pub use health::*;
pub use diagnostics::*;
pub use preview::*;
