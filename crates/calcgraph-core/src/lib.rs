pub mod change;
pub mod config_manager;
pub mod error;
pub mod id;
pub mod master;
pub mod registry;
pub mod result_model;
pub mod statistics;
pub mod value;
pub mod version;

pub use change::*;
pub use config_manager::*;
pub use error::*;
pub use id::*;
pub use master::*;
pub use registry::*;
pub use result_model::*;
pub use statistics::*;
pub use value::*;
pub use version::*;
