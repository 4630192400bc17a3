//! Request / response types of the HTTP API, with their OpenAPI schemas.

pub mod v1;
