//! Captured console output
//!
//! `println` never touches real stdout: lines land in the run's print
//! buffer, truncated to the feedback width, and come back on the Step.

use super::{Applier, Builtin, Kind};
use crate::config::PRINT_WIDTH;
use crate::error::Exception;
use crate::value::{display_plain, truncate_line, Value};

fn println(applier: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    let precision = applier.float_precision();
    let rendered: Vec<String> = args
        .iter()
        .map(|v| {
            let v = match precision {
                Some(p) => v.round_floats(p),
                None => v.clone(),
            };
            display_plain(&v)
        })
        .collect();
    applier.print_line(truncate_line(rendered.join(" "), PRINT_WIDTH));
    Ok(Value::Nil)
}

pub const CATALOG: &[Builtin] = &[
    Builtin { name: "println", kind: Kind::Variadic(0), arity: "any", f: println },
];
