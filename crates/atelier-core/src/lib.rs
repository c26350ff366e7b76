//! Workshop enrollment core: data model, authorization policy, and the
//! capacity/attendance engine, with the storage backends they run on.
//!
//! The engine owns every roster transition. Mutations are optimistic: fetch
//! a snapshot, re-check the business gates, and compare-and-swap the new
//! state, so two callers racing for the last seat cannot both win it.

#![deny(unsafe_code)]

pub mod engine;
pub mod error;
pub mod policy;
pub mod store;
pub mod types;

pub use engine::EnrollmentEngine;
pub use error::EnrollError;
pub use policy::{authorize, Caller, DenialReason, PolicyDecision, WorkshopAction};
pub use store::{
    MemoryStore, PostgresStore, RosterStore, StorageConfig, StoreError, StoreResult, Stores,
    UserStore,
};
pub use types::{
    AttendanceRecord, NewWorkshop, Role, User, UserId, UserStatus, Vacancies, Workshop,
    WorkshopId, WorkshopPatch, WorkshopStatus,
};
