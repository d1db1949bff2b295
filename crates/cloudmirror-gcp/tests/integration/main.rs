//! Integration tests for cloudmirror-gcp
//!
//! Uses wiremock to simulate the Compute Engine API and verifies the
//! client, the instance adapter and full endpoint enumeration cycles
//! against an in-memory resource store.

mod common;

mod test_enumeration;
mod test_list_instances;
