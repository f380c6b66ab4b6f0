pub mod active;
pub mod context;
pub mod fields;
pub mod tracker;
pub mod validation;

pub use active::{ActiveRecord, EntityModel, load_model, new_model, save_model};
pub use context::{Connections, RecordContext};
pub use fields::{EntityDescriptor, FieldDescriptor, FieldRegistry};
pub use tracker::ChangeTracker;
pub use validation::{FieldViolation, ValidationErrors};
