//! Arithmetic operations
//!
//! Integer arithmetic stays integral; any float operand promotes the whole
//! expression. `/` always yields a float. Integer overflow is reported
//! rather than wrapped.

use super::{Applier, Builtin, Kind};
use crate::error::{Exception, LispError, ARITY_ONE, ARITY_TWO};
use crate::value::Value;

#[derive(Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

fn num(function: &str, v: &Value) -> Result<Num, LispError> {
    match v {
        Value::Int(n) => Ok(Num::Int(*n)),
        Value::Float(f) => Ok(Num::Float(*f)),
        other => Err(LispError::type_error(function, "a number", other.type_name())),
    }
}

fn overflow(function: &str) -> LispError {
    LispError::type_error(function, "a result within integer range", "overflow")
}

impl Num {
    fn to_value(self) -> Value {
        match self {
            Num::Int(n) => Value::Int(n),
            Num::Float(f) => Value::Float(f),
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Num::Int(n) => n as f64,
            Num::Float(f) => f,
        }
    }
}

fn fold_add(function: &str, acc: Num, next: Num) -> Result<Num, LispError> {
    match (acc, next) {
        (Num::Int(a), Num::Int(b)) => a.checked_add(b).map(Num::Int).ok_or_else(|| overflow(function)),
        (a, b) => Ok(Num::Float(a.as_f64() + b.as_f64())),
    }
}

fn fold_sub(function: &str, acc: Num, next: Num) -> Result<Num, LispError> {
    match (acc, next) {
        (Num::Int(a), Num::Int(b)) => a.checked_sub(b).map(Num::Int).ok_or_else(|| overflow(function)),
        (a, b) => Ok(Num::Float(a.as_f64() - b.as_f64())),
    }
}

fn fold_mul(function: &str, acc: Num, next: Num) -> Result<Num, LispError> {
    match (acc, next) {
        (Num::Int(a), Num::Int(b)) => a.checked_mul(b).map(Num::Int).ok_or_else(|| overflow(function)),
        (a, b) => Ok(Num::Float(a.as_f64() * b.as_f64())),
    }
}

fn add(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    let mut acc = Num::Int(0);
    for arg in args {
        acc = fold_add("+", acc, num("+", arg)?)?;
    }
    Ok(acc.to_value())
}

fn sub(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    let first = num("-", &args[0])?;
    if args.len() == 1 {
        return Ok(fold_sub("-", Num::Int(0), first)?.to_value());
    }
    let mut acc = first;
    for arg in &args[1..] {
        acc = fold_sub("-", acc, num("-", arg)?)?;
    }
    Ok(acc.to_value())
}

fn mul(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    let mut acc = Num::Int(1);
    for arg in args {
        acc = fold_mul("*", acc, num("*", arg)?)?;
    }
    Ok(acc.to_value())
}

fn div(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    let first = num("/", &args[0])?.as_f64();
    let mut acc = if args.len() == 1 { 1.0 / first } else { first };
    if args.len() == 1 && first == 0.0 {
        return Err(LispError::type_error("/", "a non-zero divisor", "0").into());
    }
    for arg in &args[1..] {
        let d = num("/", arg)?.as_f64();
        if d == 0.0 {
            return Err(LispError::type_error("/", "a non-zero divisor", "0").into());
        }
        acc /= d;
    }
    Ok(Value::Float(acc))
}

/// Floored modulo, matching `mod` rather than truncating remainder.
fn modulo(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    match (num("mod", &args[0])?, num("mod", &args[1])?) {
        (Num::Int(_), Num::Int(0)) => {
            Err(LispError::type_error("mod", "a non-zero divisor", "0").into())
        }
        (Num::Int(a), Num::Int(b)) => Ok(Value::Int(a.rem_euclid(b))),
        (a, b) => {
            let (a, b) = (a.as_f64(), b.as_f64());
            if b == 0.0 {
                return Err(LispError::type_error("mod", "a non-zero divisor", "0").into());
            }
            Ok(Value::Float(a.rem_euclid(b)))
        }
    }
}

fn inc(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    Ok(fold_add("inc", num("inc", &args[0])?, Num::Int(1))?.to_value())
}

fn dec(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    Ok(fold_sub("dec", num("dec", &args[0])?, Num::Int(1))?.to_value())
}

fn abs(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    match num("abs", &args[0])? {
        Num::Int(n) => Ok(Value::Int(n.checked_abs().ok_or_else(|| overflow("abs"))?)),
        Num::Float(f) => Ok(Value::Float(f.abs())),
    }
}

fn min_max(function: &str, args: &[Value], want_max: bool) -> Result<Value, Exception> {
    let mut best = num(function, &args[0])?;
    for arg in &args[1..] {
        let n = num(function, arg)?;
        let replace = if want_max {
            n.as_f64() > best.as_f64()
        } else {
            n.as_f64() < best.as_f64()
        };
        if replace {
            best = n;
        }
    }
    Ok(best.to_value())
}

fn min(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    min_max("min", args, false)
}

fn max(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    min_max("max", args, true)
}

fn to_int(function: &str, f: f64) -> Result<Value, LispError> {
    if f.is_finite() && (i64::MIN as f64..=i64::MAX as f64).contains(&f) {
        Ok(Value::Int(f as i64))
    } else {
        Err(overflow(function))
    }
}

fn round(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    match num("round", &args[0])? {
        Num::Int(n) => Ok(Value::Int(n)),
        Num::Float(f) => Ok(to_int("round", f.round())?),
    }
}

fn floor(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    match num("floor", &args[0])? {
        Num::Int(n) => Ok(Value::Int(n)),
        Num::Float(f) => Ok(to_int("floor", f.floor())?),
    }
}

fn ceil(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    match num("ceil", &args[0])? {
        Num::Int(n) => Ok(Value::Int(n)),
        Num::Float(f) => Ok(to_int("ceil", f.ceil())?),
    }
}

pub const CATALOG: &[Builtin] = &[
    Builtin { name: "+", kind: Kind::Variadic(0), arity: "any", f: add },
    Builtin { name: "-", kind: Kind::VariadicNonEmpty, arity: "at least 1", f: sub },
    Builtin { name: "*", kind: Kind::Variadic(0), arity: "any", f: mul },
    Builtin { name: "/", kind: Kind::VariadicNonEmpty, arity: "at least 1", f: div },
    Builtin { name: "mod", kind: Kind::Fixed(2), arity: ARITY_TWO, f: modulo },
    Builtin { name: "inc", kind: Kind::Fixed(1), arity: ARITY_ONE, f: inc },
    Builtin { name: "dec", kind: Kind::Fixed(1), arity: ARITY_ONE, f: dec },
    Builtin { name: "abs", kind: Kind::Fixed(1), arity: ARITY_ONE, f: abs },
    Builtin { name: "min", kind: Kind::VariadicNonEmpty, arity: "at least 1", f: min },
    Builtin { name: "max", kind: Kind::VariadicNonEmpty, arity: "at least 1", f: max },
    Builtin { name: "round", kind: Kind::Fixed(1), arity: ARITY_ONE, f: round },
    Builtin { name: "floor", kind: Kind::Fixed(1), arity: ARITY_ONE, f: floor },
    Builtin { name: "ceil", kind: Kind::Fixed(1), arity: ARITY_ONE, f: ceil },
];
