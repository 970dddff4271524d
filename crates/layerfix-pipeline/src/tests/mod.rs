//! Test suites and doubles shared by the pipeline's unit tests.

mod pipeline_behaviour;
pub(crate) mod support;
