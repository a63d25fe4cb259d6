pub mod url_validation;
pub use url_validation::{
    UrlValidationError, join_endpoint, validate_base_url, validate_endpoint_path,
    validate_transport_url,
};
