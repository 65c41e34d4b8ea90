pub mod args;
pub mod display;
pub mod report;

pub use args::Args;
pub use display::print_outcome;
pub use report::report_error;
