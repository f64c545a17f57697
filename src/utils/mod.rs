pub mod backoff;
pub mod path;
pub mod scoped_timer;
pub mod time;
