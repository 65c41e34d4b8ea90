mod common;
mod objectives;
mod pipelining;
mod properties;
mod scheduling;
mod spills;
