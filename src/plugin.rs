//! Bundler-facing plugin layer.
//!
//! - [`site_loader`] implements the bundler hooks for one build target
//! - [`module_cache`] memoizes remote module sources for the process lifetime
//! - [`style_cache`] flattens nested section CSS, once per distinct input

pub mod module_cache;
pub mod site_loader;
pub mod style_cache;
