//! Batched search over the multi-index endpoint.
//!
//! `engine` owns pagination of every query in a batch; `domain` holds the
//! per-index decoding and filtering contracts supplied by the caller.

pub mod domain;
pub mod engine;


pub use domain::{fields_contain, DomainRegistry, HitDomain};
pub use engine::{
    apply_hit_filter, AggregationEngine, AggregationOutcome, Completeness, PartialReason, QueryOutcome,
};
