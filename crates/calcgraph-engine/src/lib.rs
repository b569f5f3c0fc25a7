pub mod context;
pub mod cycle;
pub mod job;
pub mod market_data;
pub mod options;
pub mod processor;
pub mod signal;
pub mod sizing;
pub mod state;
pub mod view_process;

pub use context::*;
pub use cycle::*;
pub use job::*;
pub use market_data::*;
pub use options::*;
pub use processor::*;
pub use signal::*;
pub use sizing::*;
pub use state::*;
pub use view_process::*;
