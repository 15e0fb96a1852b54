//! JSON Schema handling for command and response payloads.
//!
//! ## Architecture
//!
//! - **SchemaParser**: fetches schema documents (local file or HTTP), expands
//!   `$ref`, merges `allOf`, picks the first `anyOf`/`oneOf` alternative and
//!   caches results for the process lifetime
//! - **SchemaStructure**: flat view of a resolved schema (simple fields and
//!   positional array fields)
//! - **FieldMappingResolver**: maps Operation parameter names onto a
//!   structure, producing a per-invocation packing plan
//!
//! ```text
//! reference ──fetch──→ document ──resolve──→ schema ──extract──→ SchemaStructure
//!                                                                     │
//!                       parameter names ──FieldMappingResolver────────┴──→ FieldMappingPlan
//! ```

pub mod error;
pub mod fetch;
pub mod mapping;
pub mod parser;
pub mod structure;

pub use error::{SchemaError, SchemaResult};
pub use fetch::{DefaultFetcher, SchemaFetcher};
pub use mapping::{ArrayMapping, FieldMappingPlan, FieldMappingResolver, SimpleMapping};
pub use parser::{SchemaParser, reference_url};
pub use structure::{ArrayItem, FieldType, SchemaStructure};
