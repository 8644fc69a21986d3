//! # xjsv
//!
//! **Cross-document JSON Schema validation with relational extension
//! keywords.**
//!
//! xjsv validates a corpus of JSON/YAML documents against standard JSON
//! Schemas (Draft-04 through 2020-12) augmented with five schema-level
//! keywords — `unique`, `primary_key`, `index`, `foreign_keys`,
//! `join_keys` — whose semantics span the whole corpus rather than any
//! single instance.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌───────────────┐   ┌─────────────────┐
//! │  Loader    │──▶│  Traverser    │──▶│ Extension sites │
//! │ JSON/YAML  │   │ schema walk   │   │ + PK providers  │
//! └─────┬─────┘   └───────────────┘   └────────┬────────┘
//!       │                                      │
//!       ▼            phase 1                   ▼   phase 2
//! ┌───────────┐   ┌───────────────┐   ┌─────────────────┐
//! │ Instances  │──▶│ draft checks  │──▶│ uniqueness, FK  │──▶ report
//! │ (corpus)   │   │ + key tuples  │   │ / JK resolution │
//! └───────────┘   └───────────────┘   └─────────────────┘
//!                        ▲
//!              ┌─────────┴──────────┐
//!              │ key cache + remote │
//!              │ key providers      │
//!              └────────────────────┘
//! ```
//!
//! ## Validation flow
//!
//! 1. Schemas and instances load from directories ([`store`]).
//! 2. The traverser ([`traverse`]) walks every subschema, recording an
//!    [`extensions::ExtensionSite`] (with a host [`paths::PathTemplate`])
//!    wherever an extension keyword appears.
//! 3. Phase 1 runs per document: standard draft validation ([`standard`])
//!    plus key-tuple gathering ([`keys`]).
//! 4. Provider keys merge in from remote feeds ([`provider`]) through the
//!    persistent cache ([`cache`]).
//! 5. Phase 2 resolves uniqueness and referential integrity across the
//!    whole corpus ([`validator`], [`resolver`]) and emits the report
//!    ([`report`]).
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | YAML run configuration (providers, cache, fetch limits) |
//! | [`models`] | Core data types: documents, cache entries, tuple records |
//! | [`paths`] | Path templates resolved against instance documents |
//! | [`keys`] | Canonical key tuples and member extraction |
//! | [`extensions`] | The five extension keywords and their grammar |
//! | [`traverse`] | Schema traversal discovering extension sites |
//! | [`store`] | Document store and JSON/YAML directory loader |
//! | [`standard`] | Standard draft validation via the `jsonschema` crate |
//! | [`cache`] | Persistent key cache with atomic replacement |
//! | [`provider`] | Remote key providers: URL composition, retry, fan-out |
//! | [`resolver`] | Primary-key / index registries and FK / JK membership |
//! | [`validator`] | Two-phase orchestration and error accumulation |
//! | [`report`] | Report data model (JSON serializable) |

pub mod cache;
pub mod config;
pub mod extensions;
pub mod keys;
pub mod models;
pub mod paths;
pub mod provider;
pub mod report;
pub mod resolver;
pub mod standard;
pub mod store;
pub mod traverse;
pub mod validator;
