pub mod doc;
pub mod health;
pub mod messages;
pub mod preview;
pub mod diagnostics;
pub mod error;

pub use doc::*;
pub use health::*;
pub use messages::*;
pub use preview::*;
pub use diagnostics::*;
pub use error::*;
