use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("at most one objective may be enabled, found: {}", .0.join(", "))]
    ConflictingObjectives(Vec<String>),

    #[error("`{option}` is {value}, expected {expected}")]
    OutOfRange {
        option: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("`{option}` is not supported {reason}")]
    Unsupported {
        option: &'static str,
        reason: &'static str,
    },

    #[error("invalid renaming `{value}` for `{register}`: not a register of the architecture")]
    InvalidRenaming { register: String, value: String },

    #[error("malformed configuration: {0}")]
    Toml(#[from] toml::de::Error),
}
