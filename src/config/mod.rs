pub mod types;
pub mod loader;
pub mod validator;
pub mod resolved;
pub mod settings;

pub use types::*;
pub use loader::*;
pub use validator::*;
pub use resolved::*;
pub use settings::Settings;

/// Schema document shared by unit and integration tests.
#[cfg(test)]
pub(crate) const FIXTURE_SCHEMA: &str = include_str!("../../tests/fixtures/schema.json");

#[cfg(test)]
pub(crate) fn fixture_schema() -> Schema {
    resolve(&parse_schema(FIXTURE_SCHEMA).expect("fixture parses")).expect("fixture resolves")
}
