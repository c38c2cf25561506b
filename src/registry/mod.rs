//! # Registry Infrastructure
//!
//! Process-wide bookkeeping shared between listener instances.
//!
//! ## Available Registries
//!
//! - **IdentityRegistry**: identities held by automatically-managed listeners

pub mod identity_registry;

pub use identity_registry::IdentityRegistry;
