//! API handlers grouped by resource.

mod catalogs;
mod jobs;
mod mutations;
mod settings;

pub use catalogs::*;
pub use jobs::*;
pub use mutations::*;
pub use settings::*;
