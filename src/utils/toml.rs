use crate::models::error::SError;
use serde::de::DeserializeOwned;

pub struct Toml;

impl Toml {
    pub fn parse<T: DeserializeOwned>(raw: &str) -> Result<T, SError> {
        toml::from_str::<T>(raw).map_err(|e| SError::ParseError(e.to_string()))
    }
}
