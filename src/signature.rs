// ABOUTME: Signature grammar parsing and input/output validation

use crate::error::LispError;
use crate::value::{map_lookup, Key, Value};
use nom::{
    bytes::complete::{tag, take_while, take_while1},
    IResult, Parser,
};
use std::collections::BTreeMap;

/// A type in the signature grammar:
/// `:string | :int | :float | :bool | :keyword | :any | :map | [type] |
/// {field :type, ...}` with `?` marking optional fields.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeSpec {
    Str,
    Int,
    Float,
    Bool,
    Keyword,
    Any,
    MapAny,
    List(Box<TypeSpec>),
    Record(Vec<Field>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub spec: TypeSpec,
    pub optional: bool,
}

/// A parsed signature: `"(param :type, ...) -> output"` or the bare-output
/// degenerate form used for return-only validation.
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    pub source: String,
    pub params: Vec<Field>,
    pub output: TypeSpec,
}

fn invalid(message: impl Into<String>) -> LispError {
    LispError::Validation {
        path: "signature".to_string(),
        message: message.into(),
    }
}

// ===== Grammar =====

fn ws(input: &str) -> IResult<&str, &str> {
    take_while(|c: char| c.is_whitespace() || c == ',')(input)
}

fn ident(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '_' || c == '-')(input)
}

fn parse_type(input: &str) -> IResult<&str, TypeSpec> {
    let (input, _) = ws(input)?;

    if let Ok((rest, _)) = tag::<_, _, nom::error::Error<&str>>("[").parse(input) {
        let (rest, inner) = parse_type(rest)?;
        let (rest, _) = ws(rest)?;
        let (rest, _) = tag("]").parse(rest)?;
        return Ok((rest, TypeSpec::List(Box::new(inner))));
    }

    if let Ok((rest, _)) = tag::<_, _, nom::error::Error<&str>>("{").parse(input) {
        let (rest, fields) = parse_fields(rest)?;
        let (rest, _) = ws(rest)?;
        let (rest, _) = tag("}").parse(rest)?;
        return Ok((rest, TypeSpec::Record(fields)));
    }

    let (rest, _) = tag(":").parse(input)?;
    let (rest, name) = ident(rest)?;
    let spec = match name {
        "string" => TypeSpec::Str,
        "int" => TypeSpec::Int,
        "float" => TypeSpec::Float,
        "bool" => TypeSpec::Bool,
        "keyword" => TypeSpec::Keyword,
        "any" => TypeSpec::Any,
        "map" => TypeSpec::MapAny,
        _ => {
            return Err(nom::Err::Error(nom::error::Error::new(
                input,
                nom::error::ErrorKind::Tag,
            )))
        }
    };
    Ok((rest, spec))
}

fn parse_field(input: &str) -> IResult<&str, Field> {
    let (input, _) = ws(input)?;
    let (input, name) = ident(input)?;
    let (input, optional) = match tag::<_, _, nom::error::Error<&str>>("?").parse(input) {
        Ok((rest, _)) => (rest, true),
        Err(_) => (input, false),
    };
    let (input, _) = ws(input)?;
    let (input, spec) = parse_type(input)?;
    Ok((
        input,
        Field {
            name: name.to_string(),
            spec,
            optional,
        },
    ))
}

fn parse_fields(mut input: &str) -> IResult<&str, Vec<Field>> {
    let mut fields = Vec::new();
    loop {
        let (rest, _) = ws(input)?;
        if rest.starts_with('}') || rest.starts_with(')') || rest.is_empty() {
            return Ok((rest, fields));
        }
        let (rest, field) = parse_field(rest)?;
        fields.push(field);
        input = rest;
    }
}

impl Signature {
    pub fn parse(src: &str) -> Result<Signature, LispError> {
        let trimmed = src.trim();

        let (params, output_src) = if let Some(rest) = trimmed.strip_prefix('(') {
            let (rest, params) = parse_fields(rest)
                .map_err(|_| invalid(format!("malformed parameter list in {:?}", src)))?;
            let rest = rest
                .strip_prefix(')')
                .ok_or_else(|| invalid(format!("missing ) in {:?}", src)))?;
            let rest = rest.trim_start();
            let rest = rest
                .strip_prefix("->")
                .ok_or_else(|| invalid(format!("missing -> in {:?}", src)))?;
            (params, rest)
        } else {
            // Bare output form, e.g. "{count :int}"
            (Vec::new(), trimmed)
        };

        let (leftover, output) = parse_type(output_src)
            .map_err(|_| invalid(format!("malformed output type in {:?}", src)))?;
        if !leftover.trim().is_empty() {
            return Err(invalid(format!(
                "unexpected trailing input {:?} in signature",
                leftover.trim()
            )));
        }

        Ok(Signature {
            source: src.to_string(),
            params,
            output,
        })
    }

    /// Validate a tool argument map (keyword keys) against the parameters.
    pub fn validate_args(&self, args: &BTreeMap<Key, Value>) -> Result<(), LispError> {
        check_record(&self.params, args, "")
    }

    /// Validate the caller's context map against the parameters.
    pub fn validate_context(&self, context: &BTreeMap<String, Value>) -> Result<(), LispError> {
        let as_keys: BTreeMap<Key, Value> = context
            .iter()
            .map(|(k, v)| (Key::Str(k.clone()), v.clone()))
            .collect();
        check_record(&self.params, &as_keys, "")
    }

    /// Validate the final return value against the output type.
    pub fn validate_output(&self, value: &Value) -> Result<(), LispError> {
        check(value, &self.output, "return")
    }
}

// ===== Checking =====

fn join_path(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", base, name)
    }
}

fn mismatch(path: &str, expected: &str, actual: &Value) -> LispError {
    LispError::Validation {
        path: if path.is_empty() { "value".to_string() } else { path.to_string() },
        message: format!("expected {}, got {}", expected, actual.type_name()),
    }
}

fn check_record(
    fields: &[Field],
    map: &BTreeMap<Key, Value>,
    base: &str,
) -> Result<(), LispError> {
    for field in fields {
        let path = join_path(base, &field.name);
        match map_lookup(map, &Key::keyword(&field.name)) {
            None => {
                if !field.optional {
                    return Err(LispError::Validation {
                        path,
                        message: "required field is missing".to_string(),
                    });
                }
            }
            Some(Value::Nil) if field.optional => {}
            Some(value) => check(value, &field.spec, &path)?,
        }
    }
    Ok(())
}

fn check(value: &Value, spec: &TypeSpec, path: &str) -> Result<(), LispError> {
    match spec {
        TypeSpec::Any => Ok(()),
        TypeSpec::Str => match value {
            Value::Str(_) => Ok(()),
            other => Err(mismatch(path, "string", other)),
        },
        TypeSpec::Int => match value {
            Value::Int(_) => Ok(()),
            other => Err(mismatch(path, "int", other)),
        },
        TypeSpec::Float => match value {
            Value::Float(_) => Ok(()),
            other => Err(mismatch(path, "float", other)),
        },
        TypeSpec::Bool => match value {
            Value::Bool(_) => Ok(()),
            other => Err(mismatch(path, "bool", other)),
        },
        TypeSpec::Keyword => match value {
            Value::Keyword(_) => Ok(()),
            other => Err(mismatch(path, "keyword", other)),
        },
        TypeSpec::MapAny => match value {
            Value::Map(_) => Ok(()),
            other => Err(mismatch(path, "map", other)),
        },
        TypeSpec::List(inner) => match value {
            Value::Vector(items) => {
                for (i, item) in items.iter().enumerate() {
                    check(item, inner, &format!("{}[{}]", path, i))?;
                }
                Ok(())
            }
            other => Err(mismatch(path, "list", other)),
        },
        TypeSpec::Record(fields) => match value {
            Value::Map(m) => check_record(fields, m, path),
            other => Err(mismatch(path, "map", other)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kw_map(pairs: &[(&str, Value)]) -> BTreeMap<Key, Value> {
        pairs
            .iter()
            .map(|(k, v)| (Key::keyword(k), v.clone()))
            .collect()
    }

    #[test]
    fn test_parse_full_signature() {
        let sig = Signature::parse("(user :map, limit :int) -> [{id :int, name :string}]").unwrap();
        assert_eq!(sig.params.len(), 2);
        assert_eq!(sig.params[0].name, "user");
        assert_eq!(sig.params[1].spec, TypeSpec::Int);
        match &sig.output {
            TypeSpec::List(inner) => match inner.as_ref() {
                TypeSpec::Record(fields) => assert_eq!(fields.len(), 2),
                other => panic!("expected record, got {:?}", other),
            },
            other => panic!("expected list, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_bare_output_form() {
        let sig = Signature::parse("{count :int}").unwrap();
        assert!(sig.params.is_empty());
        assert!(matches!(sig.output, TypeSpec::Record(_)));
    }

    #[test]
    fn test_parse_optional_fields() {
        let sig = Signature::parse("{count :int, note? :string}").unwrap();
        match &sig.output {
            TypeSpec::Record(fields) => {
                assert!(!fields[0].optional);
                assert!(fields[1].optional);
            }
            other => panic!("expected record, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Signature::parse("(x :int -> :int").is_err());
        assert!(Signature::parse(":wat").is_err());
        assert!(Signature::parse("(x :int) :int").is_err());
    }

    #[test]
    fn test_validate_output_scalar() {
        let sig = Signature::parse("() -> :int").unwrap();
        assert!(sig.validate_output(&Value::Int(3)).is_ok());
        let err = sig.validate_output(&Value::Str("3".into())).unwrap_err();
        assert_eq!(err.reason(), "validation_error");
        // Nothing coerces silently
        assert!(sig.validate_output(&Value::Float(3.0)).is_err());
    }

    #[test]
    fn test_validate_output_nested_path() {
        let sig = Signature::parse("() -> {orders [{id :int}]}").unwrap();
        let bad = Value::Map(kw_map(&[(
            "orders",
            Value::Vector(vec![Value::Map(kw_map(&[("id", Value::Str("x".into()))]))]),
        )]));
        let err = sig.validate_output(&bad).unwrap_err();
        assert!(err.to_string().contains("return.orders[0].id"));
    }

    #[test]
    fn test_validate_args_missing_and_optional() {
        let sig = Signature::parse("(q :string, limit? :int) -> :any").unwrap();
        assert!(sig
            .validate_args(&kw_map(&[("q", Value::Str("x".into()))]))
            .is_ok());
        let err = sig.validate_args(&kw_map(&[])).unwrap_err();
        assert!(err.to_string().contains("q"));
        assert!(sig
            .validate_args(&kw_map(&[
                ("q", Value::Str("x".into())),
                ("limit", Value::Int(3))
            ]))
            .is_ok());
        assert!(sig
            .validate_args(&kw_map(&[
                ("q", Value::Str("x".into())),
                ("limit", Value::Str("3".into()))
            ]))
            .is_err());
    }

    #[test]
    fn test_validate_context_uses_string_keys() {
        let sig = Signature::parse("(user :map) -> :any").unwrap();
        let mut context = BTreeMap::new();
        context.insert("user".to_string(), Value::Map(BTreeMap::new()));
        assert!(sig.validate_context(&context).is_ok());

        let mut bad = BTreeMap::new();
        bad.insert("user".to_string(), Value::Int(1));
        let err = sig.validate_context(&bad).unwrap_err();
        assert_eq!(err.reason(), "validation_error");
    }

    #[test]
    fn test_extra_keys_are_allowed() {
        let sig = Signature::parse("{count :int}").unwrap();
        let v = Value::Map(kw_map(&[
            ("count", Value::Int(1)),
            ("extra", Value::Str("fine".into())),
        ]));
        assert!(sig.validate_output(&v).is_ok());
    }
}
