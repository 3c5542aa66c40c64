//! Date shims
//!
//! Targets of the analyzer's interop rewrites (`LocalDate/parse`,
//! `System/currentTimeMillis`, `.getTime`, `java.util.Date.`) plus direct
//! date arithmetic. Dates are calendar days; instants are integer millis.

use super::{as_int, as_str, Applier, Builtin, Kind};
use crate::error::{Exception, LispError, ARITY_ONE, ARITY_TWO};
use crate::value::Value;
use chrono::{Local, NaiveDate};
use std::time::{SystemTime, UNIX_EPOCH};

fn as_date(function: &str, v: &Value) -> Result<NaiveDate, LispError> {
    match v {
        Value::Date(d) => Ok(*d),
        Value::Str(s) => parse_iso(function, s),
        other => Err(LispError::type_error(
            function,
            "a date or \"YYYY-MM-DD\" string",
            other.type_name(),
        )),
    }
}

fn parse_iso(function: &str, s: &str) -> Result<NaiveDate, LispError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| LispError::type_error(function, "a \"YYYY-MM-DD\" date string", s))
}

fn today(_: &mut dyn Applier, _: &[Value]) -> Result<Value, Exception> {
    Ok(Value::Date(Local::now().date_naive()))
}

fn date_parse(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    let s = as_str("date-parse", &args[0])?;
    Ok(Value::Date(parse_iso("date-parse", s)?))
}

fn date_add(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    let d = as_date("date-add", &args[0])?;
    let days = as_int("date-add", &args[1])?;
    chrono::Duration::try_days(days)
        .and_then(|delta| d.checked_add_signed(delta))
        .map(Value::Date)
        .ok_or_else(|| {
            LispError::type_error("date-add", "a date within calendar range", "overflow").into()
        })
}

/// Whole days from the first date to the second.
fn date_diff(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    let a = as_date("date-diff", &args[0])?;
    let b = as_date("date-diff", &args[1])?;
    Ok(Value::Int((b - a).num_days()))
}

fn now_millis(_: &mut dyn Applier, _: &[Value]) -> Result<Value, Exception> {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    Ok(Value::Int(millis))
}

/// `.getTime` target: a date becomes epoch millis at UTC midnight; an
/// instant passes through.
fn to_millis(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    match &args[0] {
        Value::Int(n) => Ok(Value::Int(*n)),
        Value::Date(d) => {
            let datetime = d.and_hms_opt(0, 0, 0).expect("midnight is always valid");
            Ok(Value::Int(datetime.and_utc().timestamp_millis()))
        }
        other => Err(LispError::type_error(
            "to-millis",
            "a date or epoch millis",
            other.type_name(),
        )
        .into()),
    }
}

pub const CATALOG: &[Builtin] = &[
    Builtin { name: "today", kind: Kind::Fixed(0), arity: "0", f: today },
    Builtin { name: "date-parse", kind: Kind::Fixed(1), arity: ARITY_ONE, f: date_parse },
    Builtin { name: "date-add", kind: Kind::Fixed(2), arity: ARITY_TWO, f: date_add },
    Builtin { name: "date-diff", kind: Kind::Fixed(2), arity: ARITY_TWO, f: date_diff },
    Builtin { name: "now-millis", kind: Kind::Fixed(0), arity: "0", f: now_millis },
    Builtin { name: "to-millis", kind: Kind::Fixed(1), arity: ARITY_ONE, f: to_millis },
];
