//! Module for the standard function implementations.
//!
//! Implementations are bound by overload id and dispatched by the
//! evaluator using the overload set the checker attached to each call.
//! Hosts bind their own implementations the same way and may overlay
//! additional bindings per evaluation.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::LazyLock;

use chrono::DateTime;
use chrono::Datelike;
use chrono::FixedOffset;
use chrono::TimeDelta;
use chrono::Timelike;

use crate::error;
use crate::error::EvalError;
use crate::value::MAX_TIMESTAMP_SECONDS;
use crate::value::MIN_TIMESTAMP_SECONDS;
use crate::value::Value;
use crate::value::check_duration;
use crate::value::check_timestamp;
use crate::value::format_duration;

/// The standard function implementations.
static STANDARD: LazyLock<FunctionBindings> = LazyLock::new(FunctionBindings::new_standard);

/// Represents the context of a single function call.
pub struct CallContext<'a> {
    /// The argument values.
    ///
    /// For receiver-style calls, the receiver is the first argument.
    args: &'a [Value],
    /// The timezone used by time-component functions when no zone argument
    /// is provided.
    timezone: &'a str,
}

impl<'a> CallContext<'a> {
    /// Creates a new call context.
    pub fn new(args: &'a [Value], timezone: &'a str) -> Self {
        Self { args, timezone }
    }

    /// Gets the arguments of the call.
    pub fn args(&self) -> &[Value] {
        self.args
    }

    /// Gets the default timezone for the call.
    pub fn timezone(&self) -> &str {
        self.timezone
    }
}

/// The implementation of a function overload.
pub type FunctionImpl = Arc<dyn Fn(&CallContext<'_>) -> Value + Send + Sync>;

/// Represents a set of function implementations keyed by overload id.
#[derive(Clone, Default)]
pub struct FunctionBindings {
    /// The implementations by overload id.
    implementations: HashMap<String, FunctionImpl>,
}

impl std::fmt::Debug for FunctionBindings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionBindings")
            .field("overloads", &self.implementations.keys())
            .finish()
    }
}

impl FunctionBindings {
    /// Creates a new, empty set of bindings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the standard implementations.
    pub fn standard() -> &'static Self {
        &STANDARD
    }

    /// Binds an implementation to an overload id.
    pub fn bind(
        &mut self,
        id: impl Into<String>,
        implementation: impl Fn(&CallContext<'_>) -> Value + Send + Sync + 'static,
    ) {
        self.implementations
            .insert(id.into(), Arc::new(implementation));
    }

    /// Gets the implementation bound to an overload id.
    pub fn get(&self, id: &str) -> Option<&FunctionImpl> {
        self.implementations.get(id)
    }

    /// Builds the standard implementation set.
    fn new_standard() -> Self {
        let mut bindings = Self::new();

        for id in [
            "size_string",
            "size_bytes",
            "size_list",
            "size_map",
            "string_size",
            "bytes_size",
            "list_size",
            "map_size",
        ] {
            bindings.bind(id, |ctx| ctx.args()[0].size());
        }

        bindings.bind("contains_string", |ctx| match ctx.args() {
            [Value::String(s), Value::String(sub)] => Value::Bool(s.contains(sub.as_ref())),
            _ => Value::error(error::no_such_overload()),
        });
        bindings.bind("starts_with_string", |ctx| match ctx.args() {
            [Value::String(s), Value::String(prefix)] => {
                Value::Bool(s.starts_with(prefix.as_ref()))
            }
            _ => Value::error(error::no_such_overload()),
        });
        bindings.bind("ends_with_string", |ctx| match ctx.args() {
            [Value::String(s), Value::String(suffix)] => {
                Value::Bool(s.ends_with(suffix.as_ref()))
            }
            _ => Value::error(error::no_such_overload()),
        });

        for id in ["matches_string", "string_matches"] {
            bindings.bind(id, |ctx| match ctx.args() {
                [Value::String(s), Value::String(pattern)] => {
                    match regex::Regex::new(pattern) {
                        Ok(re) => Value::Bool(re.is_match(s)),
                        Err(e) => Value::error(error::conversion(format!(
                            "invalid match pattern: {e}"
                        ))),
                    }
                }
                _ => Value::error(error::no_such_overload()),
            });
        }

        Self::bind_int_conversions(&mut bindings);
        Self::bind_uint_conversions(&mut bindings);
        Self::bind_double_conversions(&mut bindings);
        Self::bind_string_conversions(&mut bindings);
        Self::bind_time_conversions(&mut bindings);

        bindings.bind("bytes_to_bytes", |ctx| ctx.args()[0].clone());
        bindings.bind("string_to_bytes", |ctx| match ctx.args() {
            [Value::String(s)] => Value::bytes(s.as_bytes().to_vec()),
            _ => Value::error(error::no_such_overload()),
        });

        bindings.bind("bool_to_bool", |ctx| ctx.args()[0].clone());
        bindings.bind("string_to_bool", |ctx| match ctx.args() {
            [Value::String(s)] => match s.as_ref() {
                "1" | "t" | "T" | "true" | "TRUE" | "True" => Value::Bool(true),
                "0" | "f" | "F" | "false" | "FALSE" | "False" => Value::Bool(false),
                other => Value::error(error::conversion(format!(
                    "cannot convert `{other}` to bool"
                ))),
            },
            _ => Value::error(error::no_such_overload()),
        });

        bindings.bind("to_dyn", |ctx| ctx.args()[0].clone());
        bindings.bind("type", |ctx| Value::Type(ctx.args()[0].ty()));

        Self::bind_timestamp_accessors(&mut bindings);
        Self::bind_duration_accessors(&mut bindings);
        Self::bind_optional_accessors(&mut bindings);

        bindings.bind("not_strictly_false", |ctx| {
            // Non-strict: only a definitive false stops a comprehension loop
            match ctx.args() {
                [Value::Bool(false)] => Value::Bool(false),
                _ => Value::Bool(true),
            }
        });

        bindings
    }

    /// Binds the conversions to `int`.
    fn bind_int_conversions(bindings: &mut Self) {
        bindings.bind("int_to_int", |ctx| ctx.args()[0].clone());
        bindings.bind("uint_to_int", |ctx| match ctx.args() {
            [Value::Uint(v)] => {
                if *v > i64::MAX as u64 {
                    Value::error(error::integer_overflow())
                } else {
                    Value::Int(*v as i64)
                }
            }
            _ => Value::error(error::no_such_overload()),
        });
        bindings.bind("double_to_int", |ctx| match ctx.args() {
            [Value::Double(v)] => {
                let truncated = v.trunc();
                if truncated.is_nan()
                    || truncated >= 9_223_372_036_854_775_808.0
                    || truncated < -9_223_372_036_854_775_808.0
                {
                    Value::error(error::integer_overflow())
                } else {
                    Value::Int(truncated as i64)
                }
            }
            _ => Value::error(error::no_such_overload()),
        });
        bindings.bind("string_to_int", |ctx| match ctx.args() {
            [Value::String(s)] => match s.parse() {
                Ok(v) => Value::Int(v),
                Err(_) => Value::error(error::conversion(format!(
                    "cannot convert `{s}` to int"
                ))),
            },
            _ => Value::error(error::no_such_overload()),
        });
        bindings.bind("timestamp_to_int", |ctx| match ctx.args() {
            [Value::Timestamp(t)] => Value::Int(t.timestamp()),
            _ => Value::error(error::no_such_overload()),
        });
    }

    /// Binds the conversions to `uint`.
    fn bind_uint_conversions(bindings: &mut Self) {
        bindings.bind("uint_to_uint", |ctx| ctx.args()[0].clone());
        bindings.bind("int_to_uint", |ctx| match ctx.args() {
            [Value::Int(v)] => {
                if *v < 0 {
                    Value::error(error::unsigned_overflow())
                } else {
                    Value::Uint(*v as u64)
                }
            }
            _ => Value::error(error::no_such_overload()),
        });
        bindings.bind("double_to_uint", |ctx| match ctx.args() {
            [Value::Double(v)] => {
                let truncated = v.trunc();
                if truncated.is_nan()
                    || truncated >= 18_446_744_073_709_551_616.0
                    || truncated < 0.0
                {
                    Value::error(error::unsigned_overflow())
                } else {
                    Value::Uint(truncated as u64)
                }
            }
            _ => Value::error(error::no_such_overload()),
        });
        bindings.bind("string_to_uint", |ctx| match ctx.args() {
            [Value::String(s)] => match s.parse() {
                Ok(v) => Value::Uint(v),
                Err(_) => Value::error(error::conversion(format!(
                    "cannot convert `{s}` to uint"
                ))),
            },
            _ => Value::error(error::no_such_overload()),
        });
    }

    /// Binds the conversions to `double`.
    fn bind_double_conversions(bindings: &mut Self) {
        bindings.bind("double_to_double", |ctx| ctx.args()[0].clone());
        bindings.bind("int_to_double", |ctx| match ctx.args() {
            [Value::Int(v)] => Value::Double(*v as f64),
            _ => Value::error(error::no_such_overload()),
        });
        bindings.bind("uint_to_double", |ctx| match ctx.args() {
            [Value::Uint(v)] => Value::Double(*v as f64),
            _ => Value::error(error::no_such_overload()),
        });
        bindings.bind("string_to_double", |ctx| match ctx.args() {
            [Value::String(s)] => match s.parse() {
                Ok(v) => Value::Double(v),
                Err(_) => Value::error(error::conversion(format!(
                    "cannot convert `{s}` to double"
                ))),
            },
            _ => Value::error(error::no_such_overload()),
        });
    }

    /// Binds the conversions to `string`.
    fn bind_string_conversions(bindings: &mut Self) {
        bindings.bind("string_to_string", |ctx| ctx.args()[0].clone());
        bindings.bind("int_to_string", |ctx| match ctx.args() {
            [Value::Int(v)] => Value::string(v.to_string()),
            _ => Value::error(error::no_such_overload()),
        });
        bindings.bind("uint_to_string", |ctx| match ctx.args() {
            [Value::Uint(v)] => Value::string(v.to_string()),
            _ => Value::error(error::no_such_overload()),
        });
        bindings.bind("double_to_string", |ctx| match ctx.args() {
            [Value::Double(v)] => Value::string(v.to_string()),
            _ => Value::error(error::no_such_overload()),
        });
        bindings.bind("bool_to_string", |ctx| match ctx.args() {
            [Value::Bool(v)] => Value::string(v.to_string()),
            _ => Value::error(error::no_such_overload()),
        });
        bindings.bind("bytes_to_string", |ctx| match ctx.args() {
            [Value::Bytes(v)] => match std::str::from_utf8(v) {
                Ok(s) => Value::string(s),
                Err(_) => Value::error(error::conversion(
                    "cannot convert bytes to string: invalid UTF-8",
                )),
            },
            _ => Value::error(error::no_such_overload()),
        });
        bindings.bind("timestamp_to_string", |ctx| match ctx.args() {
            [Value::Timestamp(t)] => Value::string(t.to_rfc3339()),
            _ => Value::error(error::no_such_overload()),
        });
        bindings.bind("duration_to_string", |ctx| match ctx.args() {
            [Value::Duration(d)] => Value::string(format_duration(*d)),
            _ => Value::error(error::no_such_overload()),
        });
    }

    /// Binds the conversions to `duration` and `timestamp`.
    fn bind_time_conversions(bindings: &mut Self) {
        bindings.bind("duration_to_duration", |ctx| ctx.args()[0].clone());
        bindings.bind("string_to_duration", |ctx| match ctx.args() {
            [Value::String(s)] => match parse_duration(s) {
                Ok(d) => check_duration(d),
                Err(e) => Value::error(e),
            },
            _ => Value::error(error::no_such_overload()),
        });
        bindings.bind("timestamp_to_timestamp", |ctx| ctx.args()[0].clone());
        bindings.bind("string_to_timestamp", |ctx| match ctx.args() {
            [Value::String(s)] => match DateTime::parse_from_rfc3339(s) {
                Ok(t) => check_timestamp(t),
                Err(e) => Value::error(error::conversion(format!(
                    "cannot convert `{s}` to timestamp: {e}"
                ))),
            },
            _ => Value::error(error::no_such_overload()),
        });
        bindings.bind("int_to_timestamp", |ctx| match ctx.args() {
            [Value::Int(v)] => {
                if !(MIN_TIMESTAMP_SECONDS..=MAX_TIMESTAMP_SECONDS).contains(v) {
                    return Value::error(error::timestamp_overflow());
                }

                match DateTime::from_timestamp(*v, 0) {
                    Some(t) => Value::Timestamp(t.fixed_offset()),
                    None => Value::error(error::timestamp_overflow()),
                }
            }
            _ => Value::error(error::no_such_overload()),
        });
    }

    /// Binds the timestamp component accessors.
    fn bind_timestamp_accessors(bindings: &mut Self) {
        /// The timestamp component accessors and their extraction functions.
        type Accessor = fn(&DateTime<FixedOffset>) -> i64;
        let accessors: [(&str, Accessor); 8] = [
            ("timestamp_get_full_year", |t| t.year() as i64),
            ("timestamp_get_month", |t| t.month0() as i64),
            ("timestamp_get_day_of_month", |t| t.day0() as i64),
            ("timestamp_get_date", |t| t.day() as i64),
            ("timestamp_get_hours", |t| t.hour() as i64),
            ("timestamp_get_minutes", |t| t.minute() as i64),
            ("timestamp_get_seconds", |t| t.second() as i64),
            ("timestamp_get_milliseconds", |t| {
                t.timestamp_subsec_millis() as i64
            }),
        ];

        for (id, accessor) in accessors {
            bindings.bind(id, move |ctx| match ctx.args() {
                [Value::Timestamp(t)] => match parse_timezone(ctx.timezone()) {
                    Ok(offset) => Value::Int(accessor(&t.with_timezone(&offset))),
                    Err(e) => Value::error(e),
                },
                _ => Value::error(error::no_such_overload()),
            });
            bindings.bind(format!("{id}_with_tz"), move |ctx| match ctx.args() {
                [Value::Timestamp(t), Value::String(tz)] => match parse_timezone(tz) {
                    Ok(offset) => Value::Int(accessor(&t.with_timezone(&offset))),
                    Err(e) => Value::error(e),
                },
                _ => Value::error(error::no_such_overload()),
            });
        }
    }

    /// Binds the duration component accessors.
    ///
    /// Accessors yield the total value truncated to the unit, so
    /// `duration("1h").getMinutes()` is 60.
    fn bind_duration_accessors(bindings: &mut Self) {
        /// The duration component accessors and their extraction functions.
        type Accessor = fn(&TimeDelta) -> i64;
        let accessors: [(&str, Accessor); 4] = [
            ("duration_get_hours", |d| d.num_hours()),
            ("duration_get_minutes", |d| d.num_minutes()),
            ("duration_get_seconds", |d| d.num_seconds()),
            ("duration_get_milliseconds", |d| d.num_milliseconds()),
        ];

        for (id, accessor) in accessors {
            bindings.bind(id, move |ctx| match ctx.args() {
                [Value::Duration(d)] => Value::Int(accessor(d)),
                _ => Value::error(error::no_such_overload()),
            });
        }
    }

    /// Binds the optional accessors.
    fn bind_optional_accessors(bindings: &mut Self) {
        bindings.bind("optional_has_value", |ctx| match ctx.args() {
            [Value::Optional(o)] => Value::Bool(o.has_value()),
            _ => Value::error(error::no_such_overload()),
        });
        bindings.bind("optional_value", |ctx| match ctx.args() {
            [Value::Optional(o)] => match o.value() {
                Some(value) => value.clone(),
                None => Value::error(error::optional_none_dereference()),
            },
            _ => Value::error(error::no_such_overload()),
        });
        bindings.bind("optional_or_value", |ctx| match ctx.args() {
            [Value::Optional(o), default] => match o.value() {
                Some(value) => value.clone(),
                None => default.clone(),
            },
            _ => Value::error(error::no_such_overload()),
        });
    }
}

/// Parses a duration string.
///
/// The accepted syntax is an optional sign followed by one or more decimal
/// numbers, each with a unit suffix: `ns`, `us`, `ms`, `s`, `m`, or `h`
/// (for example `1h30m` or `-2.5s`).
pub fn parse_duration(text: &str) -> Result<TimeDelta, EvalError> {
    /// Creates the malformed-duration error for the given input.
    fn malformed(text: &str) -> EvalError {
        error::conversion(format!("cannot convert `{text}` to duration"))
    }

    let mut rest = text;
    let negative = match rest.as_bytes().first() {
        Some(b'-') => {
            rest = &rest[1..];
            true
        }
        Some(b'+') => {
            rest = &rest[1..];
            false
        }
        _ => false,
    };

    if rest == "0" {
        return Ok(TimeDelta::zero());
    }

    if rest.is_empty() {
        return Err(malformed(text));
    }

    let mut total_nanos: i128 = 0;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(rest.len());
        let (number, unit_start) = rest.split_at(digits);
        if number.is_empty() {
            return Err(malformed(text));
        }

        let value = f64::from_str(number).map_err(|_| malformed(text))?;

        let (unit_nanos, unit_len): (i128, usize) = if unit_start.starts_with("ns") {
            (1, 2)
        } else if unit_start.starts_with("us") {
            (1_000, 2)
        } else if unit_start.starts_with("µs") {
            (1_000, "µs".len())
        } else if unit_start.starts_with("ms") {
            (1_000_000, 2)
        } else if unit_start.starts_with('s') {
            (1_000_000_000, 1)
        } else if unit_start.starts_with('m') {
            (60 * 1_000_000_000, 1)
        } else if unit_start.starts_with('h') {
            (3600 * 1_000_000_000, 1)
        } else {
            return Err(malformed(text));
        };

        total_nanos += (value * unit_nanos as f64) as i128;
        rest = &unit_start[unit_len..];
    }

    if negative {
        total_nanos = -total_nanos;
    }

    let mut seconds = (total_nanos / 1_000_000_000) as i64;
    let mut nanos = (total_nanos % 1_000_000_000) as i64;
    // Normalize to a nonnegative subsecond component
    if nanos < 0 {
        seconds -= 1;
        nanos += 1_000_000_000;
    }

    TimeDelta::new(seconds, nanos as u32).ok_or_else(error::duration_overflow)
}

/// Parses a timezone specifier.
///
/// The empty string, `UTC`, and `Z` resolve to UTC; otherwise the
/// specifier must be a fixed numeric offset such as `+05:30` or `-08:00`.
pub fn parse_timezone(tz: &str) -> Result<FixedOffset, EvalError> {
    if tz.is_empty() || tz == "UTC" || tz == "Z" {
        return Ok(FixedOffset::east_opt(0).expect("zero offset should be valid"));
    }

    let (sign, rest) = match tz.as_bytes().first() {
        Some(b'+') => (1, &tz[1..]),
        Some(b'-') => (-1, &tz[1..]),
        _ => return Err(error::invalid_timezone(tz)),
    };

    let (hours, minutes) = rest.split_once(':').ok_or_else(|| error::invalid_timezone(tz))?;
    let hours: i32 = hours.parse().map_err(|_| error::invalid_timezone(tz))?;
    let minutes: i32 = minutes.parse().map_err(|_| error::invalid_timezone(tz))?;
    if hours > 18 || minutes > 59 {
        return Err(error::invalid_timezone(tz));
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .ok_or_else(|| error::invalid_timezone(tz))
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    /// Calls a standard implementation by overload id.
    fn call(id: &str, args: &[Value]) -> Value {
        let ctx = CallContext::new(args, "UTC");
        let implementation = FunctionBindings::standard()
            .get(id)
            .expect("should be bound");
        (**implementation)(&ctx)
    }

    #[test]
    fn parses_compound_durations() {
        assert_eq!(
            parse_duration("1h30m").unwrap(),
            TimeDelta::new(5400, 0).unwrap()
        );
        assert_eq!(
            parse_duration("-2.5s").unwrap(),
            TimeDelta::new(-3, 500_000_000).unwrap()
        );
        assert_eq!(parse_duration("0").unwrap(), TimeDelta::zero());
        assert!(parse_duration("5 minutes").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn converts_between_numeric_kinds() {
        assert_eq!(call("int_to_uint", &[Value::Int(7)]).equals(&Value::Uint(7)), Value::Bool(true));
        assert!(call("int_to_uint", &[Value::Int(-1)]).is_error());
        assert!(call("uint_to_int", &[Value::Uint(u64::MAX)]).is_error());
        assert_eq!(
            call("double_to_int", &[Value::Double(2.9)]).as_int(),
            Some(2)
        );
        assert!(call("double_to_int", &[Value::Double(f64::NAN)]).is_error());
    }

    #[test]
    fn matches_applies_a_pattern() {
        assert_eq!(
            call(
                "matches_string",
                &[Value::string("hello"), Value::string("h.*o")]
            )
            .as_bool(),
            Some(true)
        );
        assert!(
            call(
                "matches_string",
                &[Value::string("hello"), Value::string("(")]
            )
            .is_error()
        );
    }

    #[test]
    fn timestamp_accessors_honor_timezones() {
        let ts = DateTime::parse_from_rfc3339("2023-01-01T00:30:00Z").unwrap();
        assert_eq!(
            call("timestamp_get_full_year", &[Value::Timestamp(ts)]).as_int(),
            Some(2023)
        );
        assert_eq!(
            call(
                "timestamp_get_full_year_with_tz",
                &[Value::Timestamp(ts), Value::string("-01:00")]
            )
            .as_int(),
            Some(2022)
        );
    }

    #[test]
    fn duration_accessors_truncate_totals() {
        let d = parse_duration("1h30m").unwrap();
        assert_eq!(call("duration_get_hours", &[Value::Duration(d)]).as_int(), Some(1));
        assert_eq!(
            call("duration_get_minutes", &[Value::Duration(d)]).as_int(),
            Some(90)
        );
    }

    #[test]
    fn string_conversion_round_trips_durations() {
        let d = parse_duration("1h").unwrap();
        assert_eq!(
            call("duration_to_string", &[Value::Duration(d)]).as_str(),
            Some("3600s")
        );
    }
}
