//! Field and method descriptor parsing.
//!
//! Supports:
//! - Primitive types: `Z` boolean, `B` byte, `C` char, `S` short, `I` int,
//!   `J` long, `D` double
//! - Reference types: `Lcom/acme/Name;`
//! - Array types: `[T`
//! - Method descriptors: `(T1T2...)R` where `R` may be `V`
//!
//! Besides parsing, descriptors can be rewritten class-by-class, which is how
//! the rewriter retargets every signature into the sandbox namespace.

use std::fmt;

/// A parsed field (value) type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Double,
    Object(String),
    Array(Box<FieldType>),
}

/// A parsed method descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    pub params: Vec<FieldType>,
    /// `None` for `V`.
    pub ret: Option<FieldType>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorError {
    pub descriptor: String,
    pub reason: &'static str,
}

impl fmt::Display for DescriptorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid descriptor '{}': {}", self.descriptor, self.reason)
    }
}

impl std::error::Error for DescriptorError {}

fn error(descriptor: &str, reason: &'static str) -> DescriptorError {
    DescriptorError {
        descriptor: descriptor.to_string(),
        reason,
    }
}

impl FieldType {
    /// Parse a complete field descriptor.
    pub fn parse(descriptor: &str) -> Result<FieldType, DescriptorError> {
        let (ty, rest) = parse_field_type(descriptor, descriptor)?;
        if !rest.is_empty() {
            return Err(error(descriptor, "trailing characters"));
        }
        Ok(ty)
    }

    pub fn to_descriptor(&self) -> String {
        let mut out = String::new();
        self.write_descriptor(&mut out);
        out
    }

    fn write_descriptor(&self, out: &mut String) {
        match self {
            FieldType::Boolean => out.push('Z'),
            FieldType::Byte => out.push('B'),
            FieldType::Char => out.push('C'),
            FieldType::Short => out.push('S'),
            FieldType::Int => out.push('I'),
            FieldType::Long => out.push('J'),
            FieldType::Double => out.push('D'),
            FieldType::Object(name) => {
                out.push('L');
                out.push_str(name);
                out.push(';');
            }
            FieldType::Array(inner) => {
                out.push('[');
                inner.write_descriptor(out);
            }
        }
    }

    /// The class this type refers to, with arrays reduced to their element.
    pub fn class_name(&self) -> Option<&str> {
        match self {
            FieldType::Object(name) => Some(name),
            FieldType::Array(inner) => inner.class_name(),
            _ => None,
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, FieldType::Object(_) | FieldType::Array(_))
    }

    pub fn is_double(&self) -> bool {
        matches!(self, FieldType::Double)
    }

    /// Apply `f` to every class name inside this type.
    pub fn map_classes(&self, f: &impl Fn(&str) -> String) -> FieldType {
        match self {
            FieldType::Object(name) => FieldType::Object(f(name)),
            FieldType::Array(inner) => FieldType::Array(Box::new(inner.map_classes(f))),
            other => other.clone(),
        }
    }
}

impl MethodDescriptor {
    pub fn parse(descriptor: &str) -> Result<MethodDescriptor, DescriptorError> {
        let mut rest = descriptor
            .strip_prefix('(')
            .ok_or_else(|| error(descriptor, "method descriptor must start with '('"))?;
        let mut params = Vec::new();
        while !rest.starts_with(')') {
            if rest.is_empty() {
                return Err(error(descriptor, "unterminated parameter list"));
            }
            let (ty, tail) = parse_field_type(rest, descriptor)?;
            params.push(ty);
            rest = tail;
        }
        let ret_str = &rest[1..];
        let ret = if ret_str == "V" {
            None
        } else {
            Some(FieldType::parse(ret_str).map_err(|e| error(descriptor, e.reason))?)
        };
        Ok(MethodDescriptor { params, ret })
    }

    pub fn to_descriptor(&self) -> String {
        let mut out = String::from("(");
        for p in &self.params {
            p.write_descriptor(&mut out);
        }
        out.push(')');
        match &self.ret {
            Some(ret) => ret.write_descriptor(&mut out),
            None => out.push('V'),
        }
        out
    }

    pub fn map_classes(&self, f: &impl Fn(&str) -> String) -> MethodDescriptor {
        MethodDescriptor {
            params: self.params.iter().map(|p| p.map_classes(f)).collect(),
            ret: self.ret.as_ref().map(|r| r.map_classes(f)),
        }
    }

    pub fn arg_count(&self) -> usize {
        self.params.len()
    }

    pub fn uses_double(&self) -> bool {
        self.params.iter().any(FieldType::is_double) || self.ret.as_ref().is_some_and(FieldType::is_double)
    }
}

fn parse_field_type<'a>(input: &'a str, whole: &str) -> Result<(FieldType, &'a str), DescriptorError> {
    let mut chars = input.chars();
    let head = chars.next().ok_or_else(|| error(whole, "unexpected end of descriptor"))?;
    let rest = chars.as_str();
    let ty = match head {
        'Z' => FieldType::Boolean,
        'B' => FieldType::Byte,
        'C' => FieldType::Char,
        'S' => FieldType::Short,
        'I' => FieldType::Int,
        'J' => FieldType::Long,
        'D' => FieldType::Double,
        'L' => {
            let end = rest.find(';').ok_or_else(|| error(whole, "unterminated class name"))?;
            let name = &rest[..end];
            if name.is_empty() || name.contains(['.', '[', '(', ')']) {
                return Err(error(whole, "invalid class name"));
            }
            return Ok((FieldType::Object(name.to_string()), &rest[end + 1..]));
        }
        '[' => {
            let (inner, tail) = parse_field_type(rest, whole)?;
            return Ok((FieldType::Array(Box::new(inner)), tail));
        }
        _ => return Err(error(whole, "unknown type character")),
    };
    Ok((ty, rest))
}

/// True if the descriptor describes a method rather than a field.
pub fn is_method_descriptor(descriptor: &str) -> bool {
    descriptor.starts_with('(')
}

/// Rewrite every class name inside a field or method descriptor.
pub fn rewrite_descriptor(descriptor: &str, f: impl Fn(&str) -> String) -> Result<String, DescriptorError> {
    if is_method_descriptor(descriptor) {
        Ok(MethodDescriptor::parse(descriptor)?.map_classes(&f).to_descriptor())
    } else {
        Ok(FieldType::parse(descriptor)?.map_classes(&f).to_descriptor())
    }
}

/// Every class named by a field or method descriptor, in order of appearance.
pub fn referenced_classes(descriptor: &str) -> Result<Vec<String>, DescriptorError> {
    let types: Vec<FieldType> = if is_method_descriptor(descriptor) {
        let method = MethodDescriptor::parse(descriptor)?;
        method.params.into_iter().chain(method.ret).collect()
    } else {
        vec![FieldType::parse(descriptor)?]
    };
    Ok(types
        .iter()
        .filter_map(|t| t.class_name().map(str::to_string))
        .collect())
}

/// Type name used by `checkcast`, `instanceof` and `new`: either a plain
/// class name or an array descriptor starting with `[`.
pub fn type_operand_class(operand: &str) -> Result<Option<String>, DescriptorError> {
    if operand.starts_with('[') {
        Ok(FieldType::parse(operand)?.class_name().map(str::to_string))
    } else {
        Ok(Some(operand.to_string()))
    }
}

/// Rewrite a type operand (see [`type_operand_class`]).
pub fn rewrite_type_operand(operand: &str, f: impl Fn(&str) -> String) -> Result<String, DescriptorError> {
    if operand.starts_with('[') {
        rewrite_descriptor(operand, f)
    } else {
        Ok(f(operand))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_primitives_and_objects() {
        assert_eq!(FieldType::parse("I").unwrap(), FieldType::Int);
        assert_eq!(
            FieldType::parse("Lcom/acme/Sum;").unwrap(),
            FieldType::Object("com/acme/Sum".to_string())
        );
        assert_eq!(
            FieldType::parse("[[J").unwrap(),
            FieldType::Array(Box::new(FieldType::Array(Box::new(FieldType::Long))))
        );
    }

    #[test]
    fn test_parse_method_descriptor() {
        let m = MethodDescriptor::parse("(I[Llang/String;D)Llang/Object;").unwrap();
        assert_eq!(m.arg_count(), 3);
        assert!(m.uses_double());
        assert_eq!(m.ret, Some(FieldType::Object("lang/Object".to_string())));
        assert_eq!(m.to_descriptor(), "(I[Llang/String;D)Llang/Object;");

        let v = MethodDescriptor::parse("()V").unwrap();
        assert!(v.params.is_empty());
        assert!(v.ret.is_none());
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(FieldType::parse("").is_err());
        assert!(FieldType::parse("Lcom/acme").is_err());
        assert!(FieldType::parse("II").is_err());
        assert!(FieldType::parse("F").is_err());
        assert!(MethodDescriptor::parse("(I").is_err());
        assert!(MethodDescriptor::parse("I)V").is_err());
        assert!(MethodDescriptor::parse("()").is_err());
    }

    #[test]
    fn test_rewrite_descriptor() {
        let rewritten = rewrite_descriptor("(Llang/String;[Lcom/X;I)Llang/Object;", |n| format!("sandbox/{n}")).unwrap();
        assert_eq!(
            rewritten,
            "(Lsandbox/lang/String;[Lsandbox/com/X;I)Lsandbox/lang/Object;"
        );
        assert_eq!(rewrite_descriptor("J", |n| n.to_string()).unwrap(), "J");
    }

    #[test]
    fn test_referenced_classes_reduces_arrays() {
        let classes = referenced_classes("([[Lcom/A;ILcom/B;)[I").unwrap();
        assert_eq!(classes, vec!["com/A".to_string(), "com/B".to_string()]);
    }

    #[test]
    fn test_type_operand() {
        assert_eq!(type_operand_class("com/A").unwrap(), Some("com/A".to_string()));
        assert_eq!(type_operand_class("[Lcom/A;").unwrap(), Some("com/A".to_string()));
        assert_eq!(type_operand_class("[I").unwrap(), None);
    }
}
