//! Typed process configuration.
//!
//! Every key carries the [`ENV_PREFIX`]; the prefix is stripped before the remaining name is
//! matched against the `SCREAMING_SNAKE_CASE` fields of [`Env`]. A `.env` file in the working
//! directory is loaded first if present.

use std::borrow::Cow;
use std::iter::empty;
use std::sync::LazyLock;
use std::time::Duration;

use serde::Deserialize;
use serde::de::value::{MapDeserializer, SeqDeserializer};
use serde::de::{self, IntoDeserializer};
use thiserror::Error;
use tokio::sync::OnceCell;

use crate::constants::*;

static ENV: LazyLock<OnceCell<Env>> = LazyLock::new(OnceCell::new);

/// Process-wide configuration, read once on first use
pub async fn env() -> EnvResult<&'static Env> {
    ENV.get_or_try_init(|| async { Env::load() }).await
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Env {
    pub database_url: String,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    #[serde(default = "default_startup_delay_secs")]
    pub startup_delay_secs: u64,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// OTLP collector base url; telemetry stays local when unset
    #[serde(default)]
    pub otel_exporter_endpoint: Option<String>,

    /// Overrides [`DEFAULT_LOG_FILTER`]; `RUST_LOG` wins over both
    #[serde(default)]
    pub log_filter: Option<String>,
}

fn default_sweep_interval_secs() -> u64 {
    DEFAULT_SWEEP_INTERVAL_SECS
}

fn default_startup_delay_secs() -> u64 {
    DEFAULT_STARTUP_DELAY_SECS
}

fn default_max_connections() -> u32 {
    DEFAULT_MAX_CONNECTIONS
}

fn default_service_name() -> String {
    SERVICE_NAME.to_string()
}

impl Env {
    pub fn load() -> EnvResult<Self> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!(path = %path.display(), "loaded .env file"),
            Err(e) if e.not_found() => (),
            Err(e) => return Err(e.into()),
        }

        Ok(prefixed(ENV_PREFIX).from_env::<Env>()?)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_secs)
    }
}

// ---
//  Deserializer implementation
// ---

pub struct Prefixed<'a>(Cow<'a, str>);

/// Variable name paired with its raw value, so parse errors can name the variable
struct Val(String, String);
struct Varname(String);

struct Deserializer<'de, Iter: Iterator<Item = (String, String)>> {
    inner: MapDeserializer<'de, Vars<Iter>, EnvDeserializeError>,
}

struct Vars<Iter: Iterator<Item = (String, String)>>(Iter);

impl<Iter: Iterator<Item = (String, String)>> Iterator for Vars<Iter> {
    type Item = (Varname, Val);

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next().map(|(k, v)| (Varname(k.clone()), Val(k, v)))
    }
}

impl<'de> IntoDeserializer<'de, EnvDeserializeError> for Val {
    type Deserializer = Self;
    fn into_deserializer(self) -> Self::Deserializer {
        self
    }
}

impl<'de> IntoDeserializer<'de, EnvDeserializeError> for Varname {
    type Deserializer = Self;
    fn into_deserializer(self) -> Self::Deserializer {
        self
    }
}

macro_rules! forward_parsed_vals {
    ($($ty:ident => $method:ident,)*) => {
        $(
            fn $method<V>(self, visitor: V) -> Result<V::Value, EnvDeserializeError>
            where
                V: de::Visitor<'de>
            {
                match self.1.parse::<$ty>() {
                    Ok(val) => val.into_deserializer().$method(visitor),
                    Err(e) => Err(de::Error::custom(format_args!(
                        "{}: while parsing '{}' ({})",
                        e, self.1, self.0
                    )))
                }
            }
        )*
    };
}

impl<'de> de::Deserializer<'de> for Val {
    type Error = EnvDeserializeError;

    fn deserialize_any<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        self.1.into_deserializer().deserialize_any(visitor)
    }

    /// Comma separated; an empty value is an empty list
    fn deserialize_seq<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        if self.1.is_empty() {
            return SeqDeserializer::new(empty::<Val>()).deserialize_seq(visitor);
        }

        let name = self.0;
        let values = self
            .1
            .split(',')
            .map(|v| Val(name.clone(), v.trim().to_owned()))
            .collect::<Vec<_>>();
        SeqDeserializer::new(values.into_iter()).deserialize_seq(visitor)
    }

    fn deserialize_newtype_struct<V>(
        self,
        _: &'static str,
        visitor: V,
    ) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_enum<V>(
        self,
        _: &'static str,
        _: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_enum(self.1.into_deserializer())
    }

    /// A present but empty variable counts as unset
    fn deserialize_option<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        if self.1.trim().is_empty() {
            visitor.visit_none()
        } else {
            visitor.visit_some(self)
        }
    }

    forward_parsed_vals! {
        bool => deserialize_bool,
        u8 => deserialize_u8,
        u16 => deserialize_u16,
        u32 => deserialize_u32,
        u64 => deserialize_u64,
        i8 => deserialize_i8,
        i16 => deserialize_i16,
        i32 => deserialize_i32,
        i64 => deserialize_i64,
        f32 => deserialize_f32,
        f64 => deserialize_f64,
    }

    serde::forward_to_deserialize_any! {
        char str string unit bytes byte_buf map
        unit_struct tuple_struct identifier tuple
        ignored_any struct
    }
}

impl<'de> de::Deserializer<'de> for Varname {
    type Error = EnvDeserializeError;

    fn deserialize_any<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        self.0.into_deserializer().deserialize_any(visitor)
    }

    serde::forward_to_deserialize_any! {
        char str string unit seq option bytes byte_buf map newtype_struct
        unit_struct tuple_struct identifier tuple ignored_any
        bool u8 u16 u32 u64 i8 i16 i32 i64 f32 f64 enum struct
    }
}

impl<'de, Iter: Iterator<Item = (String, String)>> de::Deserializer<'de>
    for Deserializer<'de, Iter>
{
    type Error = EnvDeserializeError;

    fn deserialize_any<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_map(self.inner)
    }

    serde::forward_to_deserialize_any! {
        char str string unit seq option bytes byte_buf map
        newtype_struct unit_struct tuple_struct identifier
        tuple ignored_any bool u8 u16 u32 u64 i8 i16 i32 i64
        f32 f64 enum struct
    }
}

pub fn from_iter<Iter, T>(iter: Iter) -> Result<T, EnvDeserializeError>
where
    T: de::DeserializeOwned,
    Iter: IntoIterator<Item = (String, String)>,
{
    T::deserialize(Deserializer {
        inner: MapDeserializer::new(Vars(iter.into_iter())),
    })
}

impl Prefixed<'_> {
    #[allow(clippy::wrong_self_convention)]
    pub fn from_env<T>(&self) -> Result<T, EnvDeserializeError>
    where
        T: de::DeserializeOwned,
    {
        self.from_iter(std::env::vars())
    }

    #[allow(clippy::wrong_self_convention)]
    pub fn from_iter<Iter, T>(&self, iter: Iter) -> Result<T, EnvDeserializeError>
    where
        T: de::DeserializeOwned,
        Iter: IntoIterator<Item = (String, String)>,
    {
        let prefix = self.0.as_ref();
        from_iter(
            iter.into_iter()
                .filter_map(|(k, v)| k.strip_prefix(prefix).map(|name| (name.to_owned(), v))),
        )
    }
}

pub fn prefixed<'a, C>(prefix: C) -> Prefixed<'a>
where
    C: Into<Cow<'a, str>>,
{
    Prefixed(prefix.into())
}

impl de::Error for EnvDeserializeError {
    fn custom<T>(msg: T) -> Self
    where
        T: std::fmt::Display,
    {
        EnvDeserializeError::Custom(msg.to_string())
    }

    fn missing_field(field: &'static str) -> Self {
        EnvDeserializeError::MissingValue(format!("{ENV_PREFIX}{field}"))
    }
}

pub type EnvResult<T> = core::result::Result<T, EnvErr>;

#[derive(Debug, Error)]
pub enum EnvErr {
    #[error(transparent)]
    Dotenvy(#[from] dotenvy::Error),

    #[error(transparent)]
    DeserializationError(#[from] EnvDeserializeError),
}

#[derive(Debug, Error)]
pub enum EnvDeserializeError {
    #[error("env deserialization error: {0}")]
    Custom(String),

    #[error("missing required variable {0}")]
    MissingValue(String),
}

#[cfg(test)]
mod test {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_fill_unset_keys() {
        let env: Env = prefixed(ENV_PREFIX)
            .from_iter(vars(&[
                ("POINTS_DATABASE_URL", "postgres://localhost/points"),
                ("DATABASE_URL", "postgres://elsewhere/ignored"),
                ("POINTS_LOG_FILTER", ""),
            ]))
            .unwrap();

        assert_eq!(env.database_url, "postgres://localhost/points");
        assert_eq!(env.sweep_interval(), Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS));
        assert_eq!(env.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert_eq!(env.service_name, SERVICE_NAME);
        assert_eq!(env.otel_exporter_endpoint, None);
        assert_eq!(env.log_filter, None);
    }

    #[test]
    fn test_numeric_keys_are_parsed() {
        let env: Env = prefixed(ENV_PREFIX)
            .from_iter(vars(&[
                ("POINTS_DATABASE_URL", "postgres://localhost/points"),
                ("POINTS_SWEEP_INTERVAL_SECS", "60"),
                ("POINTS_STARTUP_DELAY_SECS", "0"),
                ("POINTS_OTEL_EXPORTER_ENDPOINT", "http://collector:4317"),
            ]))
            .unwrap();

        assert_eq!(env.sweep_interval(), Duration::from_secs(60));
        assert_eq!(env.startup_delay(), Duration::ZERO);
        assert_eq!(env.otel_exporter_endpoint.as_deref(), Some("http://collector:4317"));
    }

    #[test]
    fn test_bad_and_missing_values_are_reported() {
        let err = prefixed(ENV_PREFIX)
            .from_iter::<_, Env>(vars(&[
                ("POINTS_DATABASE_URL", "postgres://localhost/points"),
                ("POINTS_MAX_CONNECTIONS", "lots"),
            ]))
            .unwrap_err();
        assert!(err.to_string().contains("MAX_CONNECTIONS"));

        let err = prefixed(ENV_PREFIX)
            .from_iter::<_, Env>(vars(&[]))
            .unwrap_err();
        assert!(matches!(err, EnvDeserializeError::MissingValue(ref key) if key == "POINTS_DATABASE_URL"));
    }
}
