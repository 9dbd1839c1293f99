mod differ;
mod event;
mod event_log;
mod highlight;
mod lifecycle;
mod snapshot;
mod time_base;

pub mod util;

pub use differ::diff;
pub use event::*;
pub use event_log::*;
pub use highlight::*;
pub use lifecycle::*;
pub use snapshot::*;
pub use time_base::*;
