//! Sequence operations
//!
//! Everything here is lenient about its input collection (vectors, sets,
//! maps-as-entry-pairs, strings-as-chars, nil-as-empty) and strict about
//! everything else. Higher-order members apply predicates and mappers
//! through the evaluator hook, so closures, keywords, builtins, `where`
//! predicates, and `juxt` bundles all work uniformly.

use super::{as_int, as_seq, check_predicate, Applier, Builtin, Kind};
use crate::error::{Exception, LispError, ARITY_ONE, ARITY_ONE_TO_THREE, ARITY_TWO, ARITY_TWO_OR_THREE};
use crate::value::{compare, Key, Value};
use std::cmp::Ordering;

fn count(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    let n = match &args[0] {
        Value::Nil => 0,
        Value::Vector(items) | Value::Set(items) => items.len(),
        Value::Map(m) => m.len(),
        Value::Str(s) => s.chars().count(),
        other => {
            return Err(
                LispError::type_error("count", "a collection or string", other.type_name()).into(),
            )
        }
    };
    Ok(Value::Int(n as i64))
}

fn first(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    Ok(as_seq("first", &args[0])?.into_iter().next().unwrap_or(Value::Nil))
}

fn last(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    Ok(as_seq("last", &args[0])?.pop().unwrap_or(Value::Nil))
}

fn rest(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    let items = as_seq("rest", &args[0])?;
    Ok(Value::Vector(items.into_iter().skip(1).collect()))
}

fn nth(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    let items = as_seq("nth", &args[0])?;
    let idx = as_int("nth", &args[1])?;
    let fallback = args.get(2).cloned().unwrap_or(Value::Nil);
    if idx < 0 {
        return Ok(fallback);
    }
    Ok(items.into_iter().nth(idx as usize).unwrap_or(fallback))
}

fn take(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    let n = as_int("take", &args[0])?.max(0) as usize;
    let items = as_seq("take", &args[1])?;
    Ok(Value::Vector(items.into_iter().take(n).collect()))
}

fn drop(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    let n = as_int("drop", &args[0])?.max(0) as usize;
    let items = as_seq("drop", &args[1])?;
    Ok(Value::Vector(items.into_iter().skip(n).collect()))
}

fn take_while(applier: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    check_predicate("take-while", &args[0])?;
    let items = as_seq("take-while", &args[1])?;
    let mut out = Vec::new();
    for item in items {
        if !applier.apply(&args[0], &[item.clone()])?.truthy() {
            break;
        }
        out.push(item);
    }
    Ok(Value::Vector(out))
}

fn drop_while(applier: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    check_predicate("drop-while", &args[0])?;
    let items = as_seq("drop-while", &args[1])?;
    let mut out = Vec::new();
    let mut dropping = true;
    for item in items {
        if dropping && applier.apply(&args[0], &[item.clone()])?.truthy() {
            continue;
        }
        dropping = false;
        out.push(item);
    }
    Ok(Value::Vector(out))
}

fn reverse(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    let mut items = as_seq("reverse", &args[0])?;
    items.reverse();
    Ok(Value::Vector(items))
}

// ===== Sorting =====
//
// Stable fallible merge sort: comparator errors (mixed types, bad custom
// comparators) propagate instead of panicking mid-sort.

fn merge_sort<F>(items: Vec<Value>, cmp: &mut F) -> Result<Vec<Value>, Exception>
where
    F: FnMut(&Value, &Value) -> Result<Ordering, Exception>,
{
    if items.len() <= 1 {
        return Ok(items);
    }
    let mid = items.len() / 2;
    let mut right = items;
    let left = merge_sort(right.drain(..mid).collect(), cmp)?;
    let right = merge_sort(right, cmp)?;

    let mut out = Vec::with_capacity(left.len() + right.len());
    let (mut li, mut ri) = (0, 0);
    while li < left.len() && ri < right.len() {
        if cmp(&right[ri], &left[li])? == Ordering::Less {
            out.push(right[ri].clone());
            ri += 1;
        } else {
            out.push(left[li].clone());
            li += 1;
        }
    }
    out.extend_from_slice(&left[li..]);
    out.extend_from_slice(&right[ri..]);
    Ok(out)
}

fn custom_comparator<'a>(
    applier: &'a mut dyn Applier,
    f: &'a Value,
) -> impl FnMut(&Value, &Value) -> Result<Ordering, Exception> + 'a {
    move |a, b| {
        let result = applier.apply(f, &[a.clone(), b.clone()])?;
        match result {
            Value::Int(n) => Ok(n.cmp(&0)),
            Value::Float(x) => Ok(x.partial_cmp(&0.0).unwrap_or(Ordering::Equal)),
            Value::Bool(true) => Ok(Ordering::Less),
            Value::Bool(false) => Ok(Ordering::Greater),
            other => Err(LispError::type_error(
                "sort",
                "a comparator returning a number or bool",
                other.type_name(),
            )
            .into()),
        }
    }
}

fn sort(applier: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    let (cmp_fn, coll) = match args {
        [coll] => (None, coll),
        [cmp, coll] => (Some(cmp), coll),
        _ => unreachable!("arity checked"),
    };
    let items = as_seq("sort", coll)?;
    let sorted = match cmp_fn {
        None => merge_sort(items, &mut |a, b| Ok(compare(a, b).map_err(LispError::from)?))?,
        Some(f) => {
            check_predicate("sort", f)?;
            merge_sort(items, &mut custom_comparator(applier, f))?
        }
    };
    Ok(Value::Vector(sorted))
}

fn sort_by(applier: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    let (keyfn, cmp_fn, coll) = match args {
        [keyfn, coll] => (keyfn, None, coll),
        [keyfn, cmp, coll] => (keyfn, Some(cmp), coll),
        _ => unreachable!("arity checked"),
    };
    let items = as_seq("sort-by", coll)?;

    let mut keyed: Vec<(Value, Value)> = Vec::with_capacity(items.len());
    for item in items {
        let key = applier.apply(keyfn, &[item.clone()])?;
        keyed.push((key, item));
    }

    // Sort the (key, item) pairs as two-element vectors on the key slot
    let pairs: Vec<Value> = keyed
        .into_iter()
        .map(|(k, v)| Value::Vector(vec![k, v]))
        .collect();
    let sorted = match cmp_fn {
        None => merge_sort(pairs, &mut |a, b| match (a, b) {
            (Value::Vector(a), Value::Vector(b)) => {
                Ok(compare(&a[0], &b[0]).map_err(LispError::from)?)
            }
            _ => unreachable!("pairs are vectors"),
        })?,
        Some(f) => {
            check_predicate("sort-by", f)?;
            let mut cmp = custom_comparator(applier, f);
            merge_sort(pairs, &mut |a, b| match (a, b) {
                (Value::Vector(a), Value::Vector(b)) => cmp(&a[0], &b[0]),
                _ => unreachable!("pairs are vectors"),
            })?
        }
    };

    Ok(Value::Vector(
        sorted
            .into_iter()
            .map(|pair| match pair {
                Value::Vector(mut kv) => kv.remove(1),
                _ => unreachable!("pairs are vectors"),
            })
            .collect(),
    ))
}

fn distinct(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    let items = as_seq("distinct", &args[0])?;
    let mut out: Vec<Value> = Vec::new();
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    Ok(Value::Vector(out))
}

fn concat(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    let mut out = Vec::new();
    for arg in args {
        out.extend(as_seq("concat", arg)?);
    }
    Ok(Value::Vector(out))
}

fn flatten_into(v: &Value, out: &mut Vec<Value>) {
    match v {
        Value::Vector(items) => {
            for item in items {
                flatten_into(item, out);
            }
        }
        Value::Nil => {}
        other => out.push(other.clone()),
    }
}

fn flatten(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    let items = as_seq("flatten", &args[0])?;
    let mut out = Vec::new();
    for item in &items {
        flatten_into(item, &mut out);
    }
    Ok(Value::Vector(out))
}

/// `conj` on nil creates a vector; on maps it accepts `[k v]` entries or
/// other maps.
fn conj(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    let mut target = match &args[0] {
        Value::Nil => Value::Vector(Vec::new()),
        other => other.clone(),
    };
    for item in &args[1..] {
        target = match target {
            Value::Vector(mut items) => {
                items.push(item.clone());
                Value::Vector(items)
            }
            Value::Set(mut items) => {
                if !items.contains(item) {
                    items.push(item.clone());
                }
                Value::Set(items)
            }
            Value::Map(mut m) => {
                match item {
                    Value::Vector(pair) if pair.len() == 2 => {
                        m.insert(Key::from_value(&pair[0])?, pair[1].clone());
                    }
                    Value::Map(entries) => {
                        for (k, v) in entries {
                            m.insert(k.clone(), v.clone());
                        }
                    }
                    other => {
                        return Err(LispError::type_error(
                            "conj",
                            "a [key value] entry or a map",
                            other.type_name(),
                        )
                        .into())
                    }
                }
                Value::Map(m)
            }
            other => {
                return Err(
                    LispError::type_error("conj", "a collection", other.type_name()).into(),
                )
            }
        };
    }
    Ok(target)
}

fn into(applier: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    let from = as_seq("into", &args[1])?;
    let mut conj_args = Vec::with_capacity(from.len() + 1);
    conj_args.push(args[0].clone());
    conj_args.extend(from);
    if conj_args.len() == 1 {
        return Ok(conj_args.remove(0));
    }
    conj(applier, &conj_args)
}

fn partition(_: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    let n = as_int("partition", &args[0])?;
    if n <= 0 {
        return Err(LispError::type_error("partition", "a positive chunk size", n.to_string()).into());
    }
    let (step, coll) = match args {
        [_, coll] => (n, coll),
        [_, step, coll] => (as_int("partition", step)?, coll),
        _ => unreachable!("arity checked"),
    };
    if step <= 0 {
        return Err(LispError::type_error("partition", "a positive step", step.to_string()).into());
    }
    let items = as_seq("partition", coll)?;
    let (n, step) = (n as usize, step as usize);

    let mut out = Vec::new();
    let mut start = 0;
    while start + n <= items.len() {
        out.push(Value::Vector(items[start..start + n].to_vec()));
        start += step;
    }
    Ok(Value::Vector(out))
}

fn partition_by(applier: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    check_predicate("partition-by", &args[0])?;
    let items = as_seq("partition-by", &args[1])?;
    let mut out: Vec<Value> = Vec::new();
    let mut run: Vec<Value> = Vec::new();
    let mut run_key: Option<Value> = None;

    for item in items {
        let key = applier.apply(&args[0], &[item.clone()])?;
        match &run_key {
            Some(prev) if *prev == key => run.push(item),
            Some(_) => {
                out.push(Value::Vector(std::mem::take(&mut run)));
                run.push(item);
                run_key = Some(key);
            }
            None => {
                run.push(item);
                run_key = Some(key);
            }
        }
    }
    if !run.is_empty() {
        out.push(Value::Vector(run));
    }
    Ok(Value::Vector(out))
}

fn range(applier: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    let (start, end, step) = match args {
        [end] => (0, as_int("range", end)?, 1),
        [start, end] => (as_int("range", start)?, as_int("range", end)?, 1),
        [start, end, step] => (
            as_int("range", start)?,
            as_int("range", end)?,
            as_int("range", step)?,
        ),
        _ => unreachable!("arity checked"),
    };
    if step == 0 {
        return Err(LispError::type_error("range", "a non-zero step", "0").into());
    }

    let span = if step > 0 { end - start } else { start - end };
    let len = if span <= 0 {
        0
    } else {
        ((span - 1) / step.abs() + 1) as usize
    };
    applier.charge(len.saturating_mul(16))?;

    let mut out = Vec::with_capacity(len);
    let mut i = start;
    while (step > 0 && i < end) || (step < 0 && i > end) {
        out.push(Value::Int(i));
        i += step;
    }
    Ok(Value::Vector(out))
}

fn repeat(applier: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    let n = as_int("repeat", &args[0])?.max(0) as usize;
    applier.charge(n.saturating_mul(args[1].approx_size()))?;
    Ok(Value::Vector(vec![args[1].clone(); n]))
}

// ===== map / filter / reduce family =====

fn map_fn(applier: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    let f = &args[0];
    let colls = args[1..]
        .iter()
        .map(|c| as_seq("map", c))
        .collect::<Result<Vec<_>, _>>()?;
    let len = colls.iter().map(Vec::len).min().unwrap_or(0);

    let mut out = Vec::with_capacity(len);
    for i in 0..len {
        let call_args: Vec<Value> = colls.iter().map(|c| c[i].clone()).collect();
        out.push(applier.apply(f, &call_args)?);
    }
    Ok(Value::Vector(out))
}

fn filter(applier: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    check_predicate("filter", &args[0])?;
    let items = as_seq("filter", &args[1])?;
    let mut out = Vec::new();
    for item in items {
        if applier.apply(&args[0], &[item.clone()])?.truthy() {
            out.push(item);
        }
    }
    Ok(Value::Vector(out))
}

fn remove(applier: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    check_predicate("remove", &args[0])?;
    let items = as_seq("remove", &args[1])?;
    let mut out = Vec::new();
    for item in items {
        if !applier.apply(&args[0], &[item.clone()])?.truthy() {
            out.push(item);
        }
    }
    Ok(Value::Vector(out))
}

/// First element satisfying the predicate, or nil.
fn find(applier: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    check_predicate("find", &args[0])?;
    for item in as_seq("find", &args[1])? {
        if applier.apply(&args[0], &[item.clone()])?.truthy() {
            return Ok(item);
        }
    }
    Ok(Value::Nil)
}

/// First truthy predicate *result*, or nil.
fn some(applier: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    check_predicate("some", &args[0])?;
    for item in as_seq("some", &args[1])? {
        let result = applier.apply(&args[0], &[item])?;
        if result.truthy() {
            return Ok(result);
        }
    }
    Ok(Value::Nil)
}

fn not_any(applier: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    check_predicate("not-any?", &args[0])?;
    for item in as_seq("not-any?", &args[1])? {
        if applier.apply(&args[0], &[item])?.truthy() {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

fn every(applier: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    check_predicate("every?", &args[0])?;
    for item in as_seq("every?", &args[1])? {
        if !applier.apply(&args[0], &[item])?.truthy() {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

fn reduce(applier: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    let (f, init, coll) = match args {
        [f, coll] => (f, None, coll),
        [f, init, coll] => (f, Some(init.clone()), coll),
        _ => unreachable!("arity checked"),
    };
    let items = as_seq("reduce", coll)?;

    let mut iter = items.into_iter();
    let mut acc = match init {
        Some(v) => v,
        None => match iter.next() {
            Some(v) => v,
            // Empty collection and no init: the function's identity
            None => return applier.apply(f, &[]),
        },
    };
    for item in iter {
        acc = applier.apply(f, &[acc, item])?;
    }
    Ok(acc)
}

fn combinations(applier: &mut dyn Applier, args: &[Value]) -> Result<Value, Exception> {
    let items = as_seq("combinations", &args[0])?;
    let k = as_int("combinations", &args[1])?;
    if k < 0 {
        return Err(
            LispError::type_error("combinations", "a non-negative size", k.to_string()).into(),
        );
    }
    let k = k as usize;
    if k > items.len() {
        return Ok(Value::Vector(Vec::new()));
    }

    // n choose k result size, charged before building
    let mut total: usize = 1;
    for i in 0..k.min(items.len() - k) {
        total = total.saturating_mul(items.len() - i) / (i + 1);
    }
    applier.charge(total.saturating_mul(16 * k.max(1)))?;

    let mut out = Vec::new();
    let mut current: Vec<Value> = Vec::with_capacity(k);
    fn step(
        items: &[Value],
        k: usize,
        start: usize,
        current: &mut Vec<Value>,
        out: &mut Vec<Value>,
    ) {
        if current.len() == k {
            out.push(Value::Vector(current.clone()));
            return;
        }
        let needed = k - current.len();
        for i in start..=items.len().saturating_sub(needed) {
            current.push(items[i].clone());
            step(items, k, i + 1, current, out);
            current.pop();
        }
    }
    step(&items, k, 0, &mut current, &mut out);
    Ok(Value::Vector(out))
}

pub const CATALOG: &[Builtin] = &[
    Builtin { name: "count", kind: Kind::Fixed(1), arity: ARITY_ONE, f: count },
    Builtin { name: "first", kind: Kind::Fixed(1), arity: ARITY_ONE, f: first },
    Builtin { name: "last", kind: Kind::Fixed(1), arity: ARITY_ONE, f: last },
    Builtin { name: "rest", kind: Kind::Fixed(1), arity: ARITY_ONE, f: rest },
    Builtin { name: "nth", kind: Kind::Multi(&[2, 3]), arity: ARITY_TWO_OR_THREE, f: nth },
    Builtin { name: "take", kind: Kind::Fixed(2), arity: ARITY_TWO, f: take },
    Builtin { name: "drop", kind: Kind::Fixed(2), arity: ARITY_TWO, f: drop },
    Builtin { name: "take-while", kind: Kind::Fixed(2), arity: ARITY_TWO, f: take_while },
    Builtin { name: "drop-while", kind: Kind::Fixed(2), arity: ARITY_TWO, f: drop_while },
    Builtin { name: "reverse", kind: Kind::Fixed(1), arity: ARITY_ONE, f: reverse },
    Builtin { name: "sort", kind: Kind::Multi(&[1, 2]), arity: "1-2", f: sort },
    Builtin { name: "sort-by", kind: Kind::Multi(&[2, 3]), arity: ARITY_TWO_OR_THREE, f: sort_by },
    Builtin { name: "distinct", kind: Kind::Fixed(1), arity: ARITY_ONE, f: distinct },
    Builtin { name: "concat", kind: Kind::Variadic(0), arity: "any", f: concat },
    Builtin { name: "flatten", kind: Kind::Fixed(1), arity: ARITY_ONE, f: flatten },
    Builtin { name: "conj", kind: Kind::VariadicNonEmpty, arity: "at least 1", f: conj },
    Builtin { name: "into", kind: Kind::Fixed(2), arity: ARITY_TWO, f: into },
    Builtin { name: "partition", kind: Kind::Multi(&[2, 3]), arity: ARITY_TWO_OR_THREE, f: partition },
    Builtin { name: "partition-by", kind: Kind::Fixed(2), arity: ARITY_TWO, f: partition_by },
    Builtin { name: "range", kind: Kind::Multi(&[1, 2, 3]), arity: ARITY_ONE_TO_THREE, f: range },
    Builtin { name: "repeat", kind: Kind::Fixed(2), arity: ARITY_TWO, f: repeat },
    Builtin { name: "map", kind: Kind::Variadic(2), arity: "at least 2", f: map_fn },
    Builtin { name: "mapv", kind: Kind::Variadic(2), arity: "at least 2", f: map_fn },
    Builtin { name: "filter", kind: Kind::Fixed(2), arity: ARITY_TWO, f: filter },
    Builtin { name: "remove", kind: Kind::Fixed(2), arity: ARITY_TWO, f: remove },
    Builtin { name: "find", kind: Kind::Fixed(2), arity: ARITY_TWO, f: find },
    Builtin { name: "some", kind: Kind::Fixed(2), arity: ARITY_TWO, f: some },
    Builtin { name: "not-any?", kind: Kind::Fixed(2), arity: ARITY_TWO, f: not_any },
    Builtin { name: "every?", kind: Kind::Fixed(2), arity: ARITY_TWO, f: every },
    Builtin { name: "reduce", kind: Kind::Multi(&[2, 3]), arity: ARITY_TWO_OR_THREE, f: reduce },
    Builtin { name: "combinations", kind: Kind::Fixed(2), arity: ARITY_TWO, f: combinations },
];
