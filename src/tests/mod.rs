pub mod filter_tests;
pub mod link_tests;
pub mod merkle_tests;
pub mod proof_tests;
