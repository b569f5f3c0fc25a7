pub mod builder;
pub mod definition;
pub mod function;
pub mod functions;
pub mod graph;
pub mod market_data;
pub mod node;

pub use builder::*;
pub use definition::*;
pub use function::*;
pub use functions::*;
pub use graph::*;
pub use market_data::*;
pub use node::*;
