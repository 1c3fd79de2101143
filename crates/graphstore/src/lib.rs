//! # graphstore
//!
//! Typed resource graph with transactional change execution.
//!
//! This crate provides:
//! - Resources (typed property maps), links and tags
//! - Composable queries with identical semantics on every backend
//! - An in-memory and a SQLite backend
//! - [`ChangeExecutionEngine`], the single all-or-nothing writer, with hooks
//! - [`IdAllocator`], a windowed free-id search over a resource property
//!
//! ## Example
//!
//! ```no_run
//! use graphstore::{ChangeExecutionEngine, ChangesContext, InMemoryStore, LinkType, Query};
//! use graphstore::{Resource, ResourceCategory};
//!
//! let engine = ChangeExecutionEngine::new(InMemoryStore::new());
//!
//! let host = Resource::new("Machine", ResourceCategory::Infrastructure)
//!     .with_property("name", "h1.example.com");
//! let app = Resource::new("Application", ResourceCategory::Application)
//!     .with_property("name", "web");
//!
//! let mut changes = ChangesContext::new();
//! changes
//!     .resource_add(host.clone())
//!     .resource_add(app.clone())
//!     .link_add(&app, LinkType::InstalledOn, &host);
//! engine.apply(&mut changes)?;
//!
//! let apps = engine.reader().find(&Query::of_type("Application"))?;
//! assert_eq!(apps.len(), 1);
//! # Ok::<(), graphstore::Error>(())
//! ```

pub mod allocator;
pub mod changes;
pub mod engine;
mod error;
pub mod hook;
pub mod memory;
pub mod query;
pub mod reader;
pub mod resource;
pub mod sqlite;
pub mod store;

pub use allocator::{IdAllocator, IdAllocatorConfig};
pub use changes::{ChangesContext, LinkChange, TagChange};
pub use engine::{ChangeExecutionEngine, CommitReport, EngineOptions, TypeRegistry};
pub use error::{Error, ErrorCategory, Result};
pub use hook::{ChangesHook, HookEvent, NoopHook};
pub use memory::InMemoryStore;
pub use query::{Query, like_matches};
pub use reader::GraphReader;
pub use resource::{
    InternalId, Link, LinkRecord, LinkType, PropertyValue, Resource, ResourceCategory,
    TypedResource,
};
pub use sqlite::SqliteStore;
pub use store::{LinkFilter, StoreBackend};
