pub mod db;
#[cfg(any(test, feature = "test_utils"))]
pub mod memory;
