pub mod autosave;
pub mod connctx;
pub mod docsession;
pub mod docstore;
pub mod presence;
pub mod ratelimit;
pub mod registry;
pub mod render;

pub use connctx::{ClientEnd, Identity, Transport};
pub use docsession::{Participant, Session, SessionDeps, SessionEvent};
pub use registry::SessionRegistry;
