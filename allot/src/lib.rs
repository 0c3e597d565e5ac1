#![deny(missing_docs, unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # allot
//!
//! Scheduling and execution of time-sliced shared resources.
//!
//! A [`ResourceCatalog`] describes bookable devices, their capabilities and
//! the value pools aliases are drawn from. The [`Scheduler`] turns a
//! reservation request into a tree of reservations plus the executables
//! (rooms, reused rooms, compartments) that must run during its slot. The
//! [`Database`] persists both, and the [`Executor`] periodically starts,
//! updates and stops executables through a device control channel.
//!
//! ## Core Types
//!
//! - [`Slot`]: half-open time interval
//! - [`ResourceCatalog`] and [`Resource`]: what can be booked
//! - [`Scheduler`] and [`Allocation`]: reservation requests and their results
//! - [`Executor`] and [`ExecutionPlan`]: ordered device actions
//! - [`Error`] and [`Result`]: Error handling types
//! - [`Logger`] and [`LogLevel`]: Logging infrastructure
//!
//! ## Examples
//!
//! ```
//! use allot::{AllocationState, ReservationRequest, ResourceCatalog, Scheduler, SchedulerSettings};
//! use allot::scheduler::specification::{ParticipantSpecification, Specification};
//! use allot::resource::Technology;
//!
//! let catalog = ResourceCatalog::from_yaml_str(r"
//! value_providers:
//!   - type: pattern
//!     patterns: ['{digit:2}']
//! resources:
//!   - id: 1
//!     name: mcu
//!     agent: mcu
//!     technologies: [H323]
//!     capabilities:
//!       - room_provider:
//!           license_count: 10
//!       - alias_provider:
//!           value_provider: 0
//!           aliases: [{type: H323_E164, value: '95{value}'}]
//!           restricted_to_resource: true
//! ").unwrap();
//!
//! let scheduler = Scheduler::new(&catalog, SchedulerSettings::default());
//! let request = ReservationRequest::new(
//!     "2012-01-01T12:00:00Z/2012-01-01T14:00:00Z".parse().unwrap(),
//!     Specification::Compartment {
//!         participants: vec![ParticipantSpecification::external(Technology::H323, 3)],
//!     },
//! );
//!
//! match scheduler.process(&request).unwrap() {
//!     AllocationState::Allocated(allocation) => assert_eq!(allocation.executables.len(), 2),
//!     AllocationState::Failed { report } => panic!("{report}"),
//! }
//! ```

pub mod config;
pub mod database;
pub mod error;
pub mod executable;
pub mod executor;
pub mod logging;
pub mod reservation;
pub mod resource;
pub mod scheduler;
pub mod slot;
pub mod value;

// Re-export key types at crate root for convenience
pub use config::{Config, ConfigBuilder};
pub use database::{Database, DatabaseConfig};
pub use error::{Error, Result};
pub use executor::{ExecutionPlan, ExecutionResult, Executor, ExecutorSettings};
pub use logging::{init_logger, LogLevel, Logger};
pub use reservation::{ReservationId, ReservationKind, ReservationTree};
pub use resource::{Resource, ResourceCatalog, ResourceId};
pub use scheduler::{
    Allocation, AllocationState, ReservationRequest, Scheduler, SchedulerReport, SchedulerSettings,
};
pub use slot::Slot;
