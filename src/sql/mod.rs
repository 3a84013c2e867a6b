pub mod validator;

pub use validator::{validate, Validation, ValidationIssue};
