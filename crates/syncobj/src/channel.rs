//! Channel naming.
//!
//! The channel name is the only thing two processes need to agree on to
//! share an object, so its format is fixed: `<prefix>__<TypeName>`.

/// Separator between the prefix and the type name.
pub const CHANNEL_SEPARATOR: &str = "__";

/// A type whose instances share one channel.
pub trait SyncedType {
    /// Name used in the channel name; identical across implementations.
    const TYPE_NAME: &'static str;
}

/// Build the channel name for a type name under a prefix.
pub fn channel_name(prefix: &str, type_name: &str) -> String {
    format!("{prefix}{CHANNEL_SEPARATOR}{type_name}")
}
