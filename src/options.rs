//! Construction of option structs from `key = value` properties.

use std::str::FromStr;

use log::debug;

use crate::error::{Error, Result};

/// Option structs that can be filled from string properties.
///
/// Keys use the dotted names of the analysis configuration
/// (e.g. `cpa.predicate.abstraction.cartesian`). Unknown keys are ignored so
/// one property list can configure every component.
pub trait FromProperties: Default {
    /// Apply one property. Returns `false` if the key is not recognized.
    fn set_property(&mut self, key: &str, value: &str) -> Result<bool>;

    fn from_properties<'a, I>(properties: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut options = Self::default();
        for (key, value) in properties {
            if !options.set_property(key, value.trim())? {
                debug!("Ignoring unknown option `{}`", key);
            }
        }
        Ok(options)
    }
}

pub fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(Error::InvalidConfiguration {
            key: key.to_string(),
            reason: format!("expected `true` or `false`, got `{}`", value),
        }),
    }
}

pub fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| Error::InvalidConfiguration {
        key: key.to_string(),
        reason: format!("expected a number, got `{}`", value),
    })
}
