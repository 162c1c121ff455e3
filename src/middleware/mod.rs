//! Client layers stacked on top of [`crate::client::ClientCore`].

pub mod cache;
mod redirect;

pub use cache::{CacheConfig, CacheMiddleware};
pub use redirect::RedirectMiddleware;
