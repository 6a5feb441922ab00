//! Exec Core
//!
//! A vectorized dataflow execution engine for scene computations.
//!
//! Declarative computations over a scene graph are compiled on demand into
//! a network of nodes, scheduled, and executed over masked vectors of
//! data. Results are cached and kept consistent with the scene: edits and
//! time changes invalidate exactly the values they affect and recompile
//! the parts of the network whose structure changed.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `value`: the value model, types, time and value extraction
//! - `vdf`: masks, vectors, the network, the scheduler and the executors
//! - `esf`: scene object interfaces, journals and an in-memory stage
//! - `exec`: the compiler, computation definitions, invalidation and the
//!   [`System`] facade
//! - `config` and `error`: tunables and the crate's error type
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use exec_core::esf::{MemoryStage, ScenePath};
//! use exec_core::exec::{DefinitionRegistry, System, ValueKey};
//! use exec_core::value::ValueType;
//! use exec_core::ExecConfig;
//!
//! let stage = MemoryStage::new();
//! stage.define_prim("/Ball", "Sphere").unwrap();
//! stage.create_attribute("/Ball.radius", ValueType::Double, 2.0).unwrap();
//!
//! let system = System::new(Arc::new(stage), DefinitionRegistry::new(), ExecConfig::new()).unwrap();
//! let request = system.build_request(vec![ValueKey::attribute_value(
//!     ScenePath::new("/Ball.radius").unwrap(),
//! )]);
//! let view = system.compute(&request);
//! assert_eq!(view.get_double(0), Some(2.0));
//! ```

pub mod config;
pub mod error;
pub mod esf;
pub mod exec;
pub mod value;
pub mod vdf;

pub use config::{DataManagerKind, ExecConfig};
pub use error::{ExecError, Result};
pub use exec::{CacheView, Request, System, ValueKey};
