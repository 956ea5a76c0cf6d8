pub mod events;
pub mod price;
pub mod wallet;
pub mod backfill;

pub use events::*;
pub use price::*;
pub use wallet::*;
pub use backfill::*;
