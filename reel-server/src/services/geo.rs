use std::fmt;
use std::net::IpAddr;
use std::path::Path;

use maxminddb::geoip2;
use serde::Serialize;

use crate::constants::UNKNOWN_COUNTRY;

/// Location of a client, derived from its IP address.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct GeoFacts {
    /// ISO 3166-1 alpha-2 country code, `UN` if unknown.
    pub country: String,
    pub state: String,
    pub city: String,
}

impl GeoFacts {
    /// The location reported when nothing is known about the client.
    pub fn unknown() -> Self {
        Self {
            country: UNKNOWN_COUNTRY.to_owned(),
            state: String::new(),
            city: String::new(),
        }
    }
}

impl Default for GeoFacts {
    fn default() -> Self {
        Self::unknown()
    }
}

/// Resolves the location of a client. Never fails.
pub trait GeoResolver: Send + Sync + fmt::Debug {
    fn resolve(&self, ip: Option<IpAddr>) -> GeoFacts;
}

/// Reports every client as [`GeoFacts::unknown`].
#[derive(Debug, Default)]
pub struct UnknownGeo;

impl GeoResolver for UnknownGeo {
    fn resolve(&self, _ip: Option<IpAddr>) -> GeoFacts {
        GeoFacts::unknown()
    }
}

/// Looks up clients in a MaxMind City database.
pub struct MaxMindGeoResolver(maxminddb::Reader<Vec<u8>>);

impl fmt::Debug for MaxMindGeoResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaxMindGeoResolver").finish()
    }
}

impl MaxMindGeoResolver {
    /// Reads the database at `path` into memory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, maxminddb::MaxMindDbError> {
        Ok(MaxMindGeoResolver(maxminddb::Reader::open_readfile(path)?))
    }

    fn lookup(&self, ip: IpAddr) -> Result<Option<GeoFacts>, maxminddb::MaxMindDbError> {
        let Some(city) = self.0.lookup::<geoip2::City>(ip)? else {
            return Ok(None);
        };

        let country = city
            .country
            .as_ref()
            .and_then(|country| country.iso_code)
            .unwrap_or(UNKNOWN_COUNTRY);

        let state = city
            .subdivisions
            .as_ref()
            .and_then(|subdivisions| subdivisions.first())
            .and_then(|subdivision| subdivision.names.as_ref()?.get("en").copied());

        let city = city
            .city
            .as_ref()
            .and_then(|city| city.names.as_ref()?.get("en").copied());

        Ok(Some(GeoFacts {
            country: country.to_owned(),
            state: state.unwrap_or_default().to_owned(),
            city: city.unwrap_or_default().to_owned(),
        }))
    }
}

impl GeoResolver for MaxMindGeoResolver {
    fn resolve(&self, ip: Option<IpAddr>) -> GeoFacts {
        let Some(ip) = ip else {
            return GeoFacts::unknown();
        };

        match self.lookup(ip) {
            Ok(Some(facts)) => facts,
            Ok(None) => GeoFacts::unknown(),
            Err(error) => {
                reel_log::debug!(
                    error = &error as &dyn std::error::Error,
                    "geoip lookup failed"
                );
                GeoFacts::unknown()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_geo() {
        let facts = UnknownGeo.resolve(Some("127.0.0.1".parse().unwrap()));
        assert_eq!(facts.country, "UN");
        assert!(facts.state.is_empty());
        assert!(facts.city.is_empty());
        assert_eq!(facts, GeoFacts::default());
    }

    #[test]
    fn test_open_missing_database() {
        assert!(MaxMindGeoResolver::open("/nonexistent/GeoLite2-City.mmdb").is_err());
    }
}
