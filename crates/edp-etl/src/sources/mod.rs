//! Bundled source strategies
//!
//! Each source module exposes a `register` function contributing its query
//! builder and extractors to a [`RegistryBuilder`](crate::registry::RegistryBuilder);
//! [`StrategyRegistry::with_builtin_sources`](crate::registry::StrategyRegistry::with_builtin_sources)
//! calls them all at startup.

pub mod launchpad;
pub mod mock;
