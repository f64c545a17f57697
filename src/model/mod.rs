mod properties;
mod record;


pub use properties::*;
pub use record::*;
