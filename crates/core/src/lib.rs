//! Domain types and rules shared by the marketplace client.
//!
//! Nothing in this crate performs I/O. It holds the identity and token
//! types, the KYC status machine and submission rules, notification
//! records, and the validation bridge used to report per-field errors.

pub mod error;
pub mod identity;
pub mod kyc;
pub mod notification;
pub mod roles;
pub mod types;
pub mod validation;

pub use error::{CoreError, FieldIssue};
