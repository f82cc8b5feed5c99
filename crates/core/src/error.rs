/// Domain validation failures.
///
/// Raised for bad configuration values and out-of-range model output;
/// callers wrap it in their own error types with `#[from]`.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{field} must be between 0 and 1, got {value}")]
    OutOfUnitRange { field: String, value: f64 },
}
