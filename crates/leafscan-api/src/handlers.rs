//! Request handlers.

pub mod camera;
pub mod files;
pub mod health;
pub mod pages;
pub mod stream;
pub mod upload;

pub use camera::*;
pub use files::*;
pub use health::*;
pub use pages::*;
pub use stream::*;
pub use upload::*;
