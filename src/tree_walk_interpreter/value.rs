use super::function::DruimFunction;
use crate::ast::{self, format_decimal};
use itertools::Itertools;
use ordered_float::OrderedFloat;
use std::{
    collections::BTreeMap,
    fmt::{Debug, Display},
    rc::Rc,
};

#[derive(PartialEq, Clone)]
pub enum Value {
    Num(i64),
    Dec(OrderedFloat<f64>),
    Text(Rc<String>),
    Flag(bool),
    Empty,
    Function(DruimFunction),
    Record(Record),
    List(Rc<Vec<Value>>),
}

/// Named fields captured from a statement scope. Immutable once built, so
/// clones share storage without any observable aliasing.
#[derive(PartialEq, Clone, Default)]
pub struct Record(Rc<BTreeMap<String, Value>>);

impl Record {
    pub fn new(fields: BTreeMap<String, Value>) -> Self {
        Self(Rc::new(fields))
    }
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}
impl Debug for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{{}}}",
            self.fields()
                .map(|(name, value)| format!("{}: {:?}", name, value))
                .join(", ")
        )
    }
}

impl Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(text) => {
                f.write_str("\"")?;
                f.write_str(text.replace('\n', "\\n").replace('\"', "\\\"").as_str())?;
                f.write_str("\"")
            }
            Self::List(values) => {
                write!(f, "[{}]", values.iter().map(|value| format!("{:?}", value)).join(", "))
            }
            Self::Record(record) => Debug::fmt(record, f),
            other => Display::fmt(other, f),
        }
    }
}
impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Num(n) => write!(f, "{}", n),
            Self::Dec(d) => f.write_str(&format_decimal(d.into_inner())),
            Self::Text(text) => f.write_str(text),
            Self::Flag(flag) => write!(f, "{}", flag),
            Self::Empty => f.write_str("void"),
            Self::Function(function) => Display::fmt(function, f),
            Self::Record(record) => Debug::fmt(record, f),
            Self::List(values) => write!(f, "[{}]", values.iter().join(", ")),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Num(value)
    }
}
impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Dec(OrderedFloat(value))
    }
}
impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Flag(value)
    }
}
impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::text(value)
    }
}
impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::text(value.to_string())
    }
}
impl From<Record> for Value {
    fn from(value: Record) -> Self {
        Self::Record(value)
    }
}
impl From<DruimFunction> for Value {
    fn from(value: DruimFunction) -> Self {
        Self::Function(value)
    }
}
impl From<Vec<Value>> for Value {
    fn from(values: Vec<Value>) -> Self {
        Self::List(Rc::new(values))
    }
}
impl From<&ast::LiteralValue> for Value {
    fn from(value: &ast::LiteralValue) -> Self {
        use ast::LiteralValue::*;
        match value {
            Num(value) => Self::Num(*value),
            Dec(value) => Self::Dec(*value),
            Text(value) => value.clone().into(),
            Flag(value) => Self::Flag(*value),
            Empty => Self::Empty,
        }
    }
}

impl Value {
    pub fn text(value: String) -> Self {
        Value::Text(Rc::new(value))
    }
    pub fn is_empty_value(&self) -> bool {
        matches!(self, Value::Empty)
    }
    pub fn type_of(&self) -> ValueType {
        match self {
            Value::Num(_) => ValueType::Num,
            Value::Dec(_) => ValueType::Dec,
            Value::Text(_) => ValueType::Text,
            Value::Flag(_) => ValueType::Flag,
            Value::Empty => ValueType::Empty,
            Value::Function(_) => ValueType::Function,
            Value::Record(_) => ValueType::Record,
            Value::List(_) => ValueType::List,
        }
    }
    pub fn into_record(self) -> Option<Record> {
        match self {
            Value::Record(record) => Some(record),
            _ => None,
        }
    }
    pub fn into_function(self) -> Option<DruimFunction> {
        match self {
            Value::Function(function) => Some(function),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Num,
    Dec,
    Text,
    Flag,
    Empty,
    Function,
    Record,
    List,
}

impl Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ValueType::Num => "num",
            ValueType::Dec => "dec",
            ValueType::Text => "text",
            ValueType::Flag => "flag",
            ValueType::Empty => "void",
            ValueType::Function => "function",
            ValueType::Record => "record",
            ValueType::List => "list",
        })
    }
}

impl ValueType {
    pub fn fmt_a(&self) -> &str {
        match self {
            ValueType::Num => "a num",
            ValueType::Dec => "a dec",
            ValueType::Text => "a text",
            ValueType::Flag => "a flag",
            ValueType::Empty => "void",
            ValueType::Function => "a function",
            ValueType::Record => "a record",
            ValueType::List => "a list",
        }
    }
}

#[derive(Debug)]
pub enum ValueDescriptor {
    Single(ValueType),
    AnyOf(Vec<ValueType>),
}
impl From<ValueType> for ValueDescriptor {
    fn from(value_type: ValueType) -> Self {
        ValueDescriptor::Single(value_type)
    }
}
impl ValueDescriptor {
    pub fn fmt_a(&self) -> String {
        match self {
            Self::Single(value_type) => value_type.fmt_a().to_string(),
            Self::AnyOf(types) => {
                Itertools::intersperse(types.iter().map(ValueType::fmt_a), " or ").collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(fields: &[(&str, Value)]) -> Value {
        Record::new(
            fields
                .iter()
                .map(|(name, value)| (name.to_string(), value.clone()))
                .collect(),
        )
        .into()
    }

    #[test]
    fn debug_forms() {
        assert_eq!(format!("{:?}", Value::from(3)), "3");
        assert_eq!(format!("{:?}", Value::from(2.0)), "2.0");
        assert_eq!(format!("{:?}", Value::from(2.5)), "2.5");
        assert_eq!(format!("{:?}", Value::from("a\"b")), "\"a\\\"b\"");
        assert_eq!(format!("{:?}", Value::Empty), "void");
        assert_eq!(
            format!(
                "{:?}",
                record(&[("b", "x".into()), ("a", 1.into())])
            ),
            "{a: 1, b: \"x\"}"
        );
        assert_eq!(
            format!("{:?}", Value::from(vec![1.into(), "two".into()])),
            "[1, \"two\"]"
        );
    }

    #[test]
    fn display_leaves_text_unquoted() {
        assert_eq!(Value::from("hi").to_string(), "hi");
        assert_eq!(Value::from(vec!["a".into(), 2.into()]).to_string(), "[a, 2]");
    }

    #[test]
    fn equality_is_structural_and_kind_sensitive() {
        assert_eq!(Value::from(1), Value::from(1));
        assert_ne!(Value::from(1), Value::from(1.0));
        assert_ne!(Value::from("1"), Value::from(1));
        assert_eq!(record(&[("a", 1.into())]), record(&[("a", 1.into())]));
        assert_ne!(record(&[("a", 1.into())]), record(&[("a", 2.into())]));
    }

    #[test]
    fn descriptors_read_naturally() {
        assert_eq!(
            ValueDescriptor::AnyOf(vec![ValueType::Num, ValueType::Dec]).fmt_a(),
            "a num or a dec"
        );
    }
}
