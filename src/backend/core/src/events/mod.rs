//! Entries, identities and views.
//!
//! - **`entry`**: Entity keys, replica ids, concurrency tags, and the typed
//!   event registry used by stores that persist entries by discriminator.
//! - **`aggregate`**: The `Aggregate` trait views implement, plus replay helpers.
//! - **`person`**: The sample `Person` entity used by the CLI and tests.

pub mod aggregate;
pub mod entry;
pub mod person;

pub use aggregate::*;
pub use entry::*;
pub use person::*;
