pub mod clock;
pub mod config;
pub mod default_service;
pub mod entity;
pub mod paginate;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{IndexSpec, ServiceConfig};
pub use default_service::{DefaultService, IndexState, ListOptions};
pub use entity::{EntityRef, IntoEntityId};
pub use paginate::{Paginate, Pagination};
