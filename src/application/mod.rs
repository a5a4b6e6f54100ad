pub mod delete;
pub mod list;
pub mod sync;

pub use delete::*;
pub use list::*;
pub use sync::*;
