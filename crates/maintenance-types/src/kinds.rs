//! `ActionDescription::name()` values for the concrete action kinds named in
//! §2's component table. Shared between the engine (which writes these names
//! into the descriptions `phaseOne` produces) and `maintenance-actions`
//! (which reads them back to dispatch `ActionFactory::create`), so the two
//! crates never drift on a literal string.
pub const CREATE_DATABASE: &str = "CreateDatabase";
pub const DROP_DATABASE: &str = "DropDatabase";
pub const CREATE_COLLECTION: &str = "CreateCollection";
pub const UPDATE_COLLECTION: &str = "UpdateCollection";
pub const DROP_COLLECTION: &str = "DropCollection";
pub const ENSURE_INDEX: &str = "EnsureIndex";
pub const DROP_INDEX: &str = "DropIndex";
pub const SYNCHRONIZE_SHARD: &str = "SynchronizeShard";
pub const RESIGN_SHARD_LEADERSHIP: &str = "ResignShardLeadership";
/// Test-only action kind, mirroring the original's `TestActionBasic`: not a
/// production action, only ever constructed by the integration tests in
/// `crates/maintenance-actions/tests/scenarios.rs`.
pub const TEST: &str = "Test";
