mod cache;
mod capture;
mod compiler;
mod config;
mod diag;
mod error;
mod host;
mod module;
mod restore;
mod runtime;
mod snapshot;
mod source;
mod variant;

/// Bytecode cache file layout and IO.
pub use cache::{BUILD_ID_LEN, CACHE_FORMAT_VERSION, CacheEntry, CacheKey, HEADER_LEN, PayloadCompression, decode_entry, decode_header, encode_entry, read_entry, write_entry};
/// Global capture entry points.
pub use capture::{Capturer, snapshot_globals};
/// Build pipeline and operator protocol.
pub use compiler::{CacheStatus, CompileReport, Compiled, Compiler, ModuleOrigin, NonInteractive, Operator, OperatorChoice, ReportKind, SCRIPT_SECTION};
/// Pipeline configuration.
pub use config::ReloadConfig;
/// Compiler diagnostic parsing and rendering.
pub use diag::{Diagnostic, Severity, correct_diagnostics, parse_diagnostics, render_diagnostics, worst_severity};
/// Error and result aliases.
pub use error::{ReloadError, Result};
/// Host value and handle types and their registry.
pub use host::{HandleOwnership, HostHandle, HostHandleValue, HostObject, HostTypeEntry, HostTypeRegistry, HostValue, HostValueKind, HostValueVTable, SceneObjectId, SharedHostRef};
/// Live module owner driving reloads.
pub use module::{ModuleHost, ReloadOutcome, ReloadState};
/// Restore entry points and reporting.
pub use restore::{Fixup, RestoreIssue, RestoreReport, Restorer, restore_globals};
/// Collaborator interface to the scripting runtime.
pub use runtime::{ArrayId, BuildOutput, FieldDecl, GlobalVar, ObjectId, ObjectType, PrimitiveKind, Scalar, ScriptEngine, ScriptModule, Slot, SlotValue, TypeDesc};
/// Captured snapshot and instance table.
pub use snapshot::{InstanceEntry, InstanceOrigin, InstanceTable, Snapshot, SnapshotIssue};
/// Script loading with include expansion.
pub use source::{CorrectedLine, Dependency, LineOrigin, ScriptSource, SourceLoader, SourceRoot, content_hash, parse_include};
/// Captured value model.
pub use variant::{Container, OriginKey, SkipReason, UserObjectInstance, Variant, VariantValue};
