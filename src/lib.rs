//! Stateline: a record-bound hierarchical state machine framework.
//!
//! Every persisted record can own a state machine: the record stores a
//! state identifier, the engine resolves it to a live state instance, and
//! declared edges expose state-specific operations to an external route
//! layer. States may themselves be contexts (state machines nested inside
//! a state), giving chains like `Order -> Shipping -> InTransit`.
//!
//! # Core Concepts
//!
//! - **Context**: a state machine bound to a record, declared with
//!   [`ContextBuilder`]
//! - **State**: a behavior unit active while the record stores its
//!   identifier, declared with [`StateBuilder`]
//! - **Edge**: an invocable operation on a context or state, optionally
//!   exposed as a route, declared with [`EdgeBuilder`]
//! - **Engine**: [`Fsm`] resolves, caches, transitions and authorizes
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use stateline::{
//!     ContextBuilder, Fsm, MemoryStore, RegistryBuilder, StateBuilder, StateId,
//! };
//! use stateline::store::{Fields, ModelId, RecordStore};
//!
//! const ORDER: StateId = StateId::new("Order");
//! const PENDING: StateId = StateId::new("Pending");
//! const SHIPPED: StateId = StateId::new("Shipped");
//! const ORDERS: ModelId = ModelId::new("orders");
//!
//! # fn main() -> Result<(), stateline::FsmError> {
//! let registry = RegistryBuilder::new()
//!     .register(StateBuilder::new(PENDING).alias("pending").build()?)
//!     .register(StateBuilder::new(SHIPPED).alias("shipped").build()?)
//!     .register(
//!         ContextBuilder::new(ORDER)
//!             .model(ORDERS)
//!             .states([PENDING, SHIPPED])
//!             .build()?,
//!     )
//!     .build()?;
//!
//! let store = Arc::new(MemoryStore::new());
//! let record = store.create(ORDERS, Fields::new())?;
//! let fsm = Fsm::builder().registry(registry).store(store).build()?;
//!
//! let order = fsm.context_for(&record, ORDER)?;
//! let shipped = fsm.transition_to(&order, Some(SHIPPED), None)?;
//!
//! assert_eq!(shipped.map(|state| state.id()), Some(SHIPPED));
//! assert_eq!(record.current_state().as_deref(), Some("shipped"));
//! # Ok(())
//! # }
//! ```

pub mod compare;
pub mod config;
pub mod core;
pub mod debug;
pub mod engine;
pub mod error;
pub mod logging;
pub mod registry;
pub mod routes;
pub mod store;

mod linear;

// Re-export commonly used types
pub use compare::{Compare, MatchKind, Scope};
pub use config::FsmConfig;
pub use core::{DataPolicy, StateBehavior, StateId, StateNode, StateView};
pub use debug::{Conflict, Debugger};
pub use engine::{Fsm, FsmBuilder, FsmEvent};
pub use error::FsmError;
pub use logging::{EmptyLogger, Logger, PendingLog, TracingLogger};
pub use registry::{
    Api, ApiName, BuildError, ContextBuilder, EdgeBuilder, RegistryBuilder, StateBuilder,
    StateRegistry,
};
pub use routes::{EdgeCall, EdgeRequest, RouteDeclaration, RouteSink};
pub use store::{MemoryStore, RecordHandle, RecordStore};
