mod args;
mod driver;
mod write;

pub use args::ParameterOverrides;
pub use driver::{CommandLineFlags, MZProteoformer, MZProteoformerError};
pub use write::{read_input, read_input_from, write_report, CommunityReport};
