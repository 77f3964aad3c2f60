//! # Result Documents
//!
//! - **docx**: reading and appending to `.docx` archives
//! - **results**: the shared result document every job appends to, and the
//!   listing of files under the media root

pub mod docx;
pub mod results;

pub use results::ResultDocument;
