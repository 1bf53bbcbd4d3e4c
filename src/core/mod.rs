//! Core entity model.
//!
//! This module defines what a state *is* at runtime:
//! - [`StateId`] names a state type
//! - [`StateBehavior`] carries its lifecycle hooks
//! - [`StateNode`] is the live, record-bound instance
//!
//! Definitions (declared states, aliases, edges) live in
//! [`crate::registry`]; resolution and transitions live in
//! [`crate::engine`].

mod node;
mod state;

pub use node::StateNode;
pub use state::{DataPolicy, DefaultBehavior, StateBehavior, StateId, StateView};
