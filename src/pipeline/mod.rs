//! Classification-and-dispatch pipeline.
//!
//! Every unread message flows through:
//! 1. `normalizer::normalize()`: MIME walk, headers, calendar part
//! 2. `Classifier::classify()`: one LLM call, one label
//! 3. `ActionRouter::route()`: exactly one action per message
//!
//! `calendar::extract()` and the `Composer` are used by the router on the
//! branches that need them.

pub mod calendar;
pub mod classifier;
pub mod composer;
pub mod normalizer;
pub mod processor;
pub mod router;
pub mod types;

pub use classifier::Classifier;
pub use composer::Composer;
pub use processor::TriageProcessor;
pub use router::ActionRouter;
