//! Hot reload of embedded script modules.
//!
//! A live module's globals are captured into a detached [`reload::Snapshot`],
//! the script is rebuilt from source or from the bytecode cache, and the
//! snapshot is written back into the new module's globals, rebuilding object
//! graphs and rebalancing reference counts on the way.

/// Snapshot, compile, cache and restore machinery.
pub mod reload;
