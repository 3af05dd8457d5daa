//! redb table definitions for the release store.
//!
//! Row tables use `&str` keys and JSON `&[u8]` values. Index tables map an
//! ordering key to the row id.

use redb::TableDefinition;

/// Apps keyed by `{name}`.
pub const APPS: TableDefinition<&str, &[u8]> = TableDefinition::new("apps");

/// Builds keyed by `{app}:{id}`.
pub const BUILDS: TableDefinition<&str, &[u8]> = TableDefinition::new("builds");

/// Build ids keyed by `{app}:{inverted created millis}:{id}`.
pub const BUILDS_BY_CREATED: TableDefinition<&str, &str> = TableDefinition::new("builds_by_created");

/// Releases keyed by `{app}:{id}`.
pub const RELEASES: TableDefinition<&str, &[u8]> = TableDefinition::new("releases");

/// Release ids keyed by `{app}:{inverted created millis}:{id}`.
pub const RELEASES_BY_CREATED: TableDefinition<&str, &str> =
    TableDefinition::new("releases_by_created");
