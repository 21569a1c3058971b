use super::Value;

/// Truth coercion. Functions, records and lists have no truth value and
/// yield `None`; callers turn that into an error.
pub fn truth_of(value: &Value) -> Option<bool> {
    match value {
        Value::Flag(flag) => Some(*flag),
        Value::Num(n) => Some(*n != 0),
        Value::Dec(d) => Some(d.into_inner() != 0.0),
        Value::Text(text) => Some(!text.is_empty()),
        Value::Empty => Some(false),
        Value::Function(_) | Value::Record(_) | Value::List(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree_walk_interpreter::Record;

    #[test]
    fn scalar_truth_table() {
        assert_eq!(truth_of(&Value::Flag(true)), Some(true));
        assert_eq!(truth_of(&Value::Flag(false)), Some(false));
        assert_eq!(truth_of(&Value::Num(0)), Some(false));
        assert_eq!(truth_of(&Value::Num(-3)), Some(true));
        assert_eq!(truth_of(&Value::from(0.0)), Some(false));
        assert_eq!(truth_of(&Value::from(-0.0)), Some(false));
        assert_eq!(truth_of(&Value::from(0.1)), Some(true));
        assert_eq!(truth_of(&Value::from("")), Some(false));
        assert_eq!(truth_of(&Value::from(" ")), Some(true));
        assert_eq!(truth_of(&Value::Empty), Some(false));
    }

    #[test]
    fn containers_have_no_truth() {
        assert_eq!(truth_of(&Record::default().into()), None);
        assert_eq!(truth_of(&Value::from(Vec::new())), None);
    }
}
