mod building;
mod common;
