//! Shared test fixtures: generated audio and the Vonage test key pair
//! (`vonage_test_key.pem` / `vonage_test_key.pub.pem`).

// Each test binary uses a different subset
#![allow(dead_code)]

pub mod audio_fixtures;

pub use audio_fixtures::*;

pub const VONAGE_PRIVATE_KEY_PATH: &str =
    concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/vonage_test_key.pem");
