//! The decorator chain: each wraps an `Executor` with one concern, and is
//! itself an `Executor`, so they compose in any order the caller likes
//! (`Spy<Retry<Impatient<Stash<Pool>>>>` being the usual stack).

pub mod impatient;
pub mod retry;
pub mod spy;
pub mod stash;

pub use impatient::Impatient;
pub use retry::Retry;
pub use spy::{Observer, Spy};
pub use stash::{Stash, StashConfig};
