pub mod api_error;
pub mod display_names;
pub mod routes;
