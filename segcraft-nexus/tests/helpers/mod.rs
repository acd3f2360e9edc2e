//! Test Helper Utilities
//!
//! Shared utilities for testing segcraft-nexus

pub mod db_utils;
pub mod fixtures;

pub use db_utils::{count_rows, create_test_db, stores};
pub use fixtures::{
    ingest_chain, load_library, pipeline_for, pipeline_with, program_id, start_chain, CALM_ONLY_LIBRARY,
    MACRO_ONLY_LIBRARY, TWO_MAIN_LIBRARY, WILD_ARC_LIBRARY,
};
