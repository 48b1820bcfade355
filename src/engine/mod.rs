//! Terminal front end for the reconcile engine
//!
//! 1. Display - the plan, grouped by object type
//! 2. Executing - confirmation, progress and summary around `reconcile::execute`

pub mod differ;
pub mod executor;

pub use differ::display_plan;
pub use executor::{Applied, ApplyOptions, execute};
