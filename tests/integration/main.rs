//! Integration test modules.

mod persistence_test;
mod recovery_test;
mod ride_recording_test;
