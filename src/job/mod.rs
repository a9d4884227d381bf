pub mod enums;
pub mod loader;
pub mod models;
pub mod options;
pub mod validation;

pub use enums::{ClosedSet, DefaultTab, LogLevel, RankOrder, Setting, Strategy};
pub use loader::{ParseError, RecordFormat, load_file, load_record, parse, parse_many, parse_with, to_json, to_toml};
pub use models::{Command, DispatchOptions, JobDefinition, NodeFilters, Schedule, Sequence, TriggerKind};
pub use options::{JobOption, OptionValues, ResolvedOptions};
pub use validation::{ValidationError, validate, validate_all};
