mod activation;
mod event;
mod license;
mod teacher;

pub use activation::*;
pub use event::*;
pub use license::*;
pub use teacher::*;
