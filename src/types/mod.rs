//! Canonical value categories and the comparability/coercion tables.
//!
//! Every external value and every typed expression carries a
//! [`CanonicalType`]. The functions in this module are pure and decide
//! whether two operands may meet under an operator and what type their
//! combination produces.
//!
//! | left \ right | bool | int | float | Decimal |
//! |--------------|------|-----|-------|---------|
//! | bool         | bool | int | float | Decimal |
//! | int          | int  | int | float | Decimal |
//! | float        | float| float| float| Decimal |
//! | Decimal      | Decimal | Decimal | Decimal | Decimal |
//!
//! Dates coerce to datetimes. `SetOf` wrapping survives coercion.

mod value;

pub use value::{EntityValue, Value};

use std::fmt;

use serde::Serialize;

use crate::syntax::CmpOp;

/// Numeric flavours, ordered from narrowest to widest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum NumericKind {
    Bool,
    Int,
    Float,
    Decimal,
}

/// Handle to an entity of a specific schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EntityRef {
    pub schema: u64,
    pub name: String,
    /// Root of the inheritance hierarchy (the entity itself when it has no base).
    pub root: String,
}

impl EntityRef {
    pub fn new(schema: u64, name: impl Into<String>, root: impl Into<String>) -> Self {
        Self {
            schema,
            name: name.into(),
            root: root.into(),
        }
    }
}

/// Functions that have a meaning inside a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Builtin {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    Len,
    Exists,
    Desc,
    Distinct,
    Join,
    Coalesce,
    Concat,
    Between,
    Abs,
    Select,
    Random,
}

impl Builtin {
    pub const ALL: [Builtin; 16] = [
        Builtin::Count,
        Builtin::Sum,
        Builtin::Avg,
        Builtin::Min,
        Builtin::Max,
        Builtin::Len,
        Builtin::Exists,
        Builtin::Desc,
        Builtin::Distinct,
        Builtin::Join,
        Builtin::Coalesce,
        Builtin::Concat,
        Builtin::Between,
        Builtin::Abs,
        Builtin::Select,
        Builtin::Random,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Builtin::Count => "count",
            Builtin::Sum => "sum",
            Builtin::Avg => "avg",
            Builtin::Min => "min",
            Builtin::Max => "max",
            Builtin::Len => "len",
            Builtin::Exists => "exists",
            Builtin::Desc => "desc",
            Builtin::Distinct => "distinct",
            Builtin::Join => "JOIN",
            Builtin::Coalesce => "coalesce",
            Builtin::Concat => "concat",
            Builtin::Between => "between",
            Builtin::Abs => "abs",
            Builtin::Select => "select",
            Builtin::Random => "random",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|b| b.name() == name)
    }

    /// Reducing builtins usable as `count(x for x in ...)` at the top level.
    pub fn is_aggregate(&self) -> bool {
        matches!(
            self,
            Builtin::Count
                | Builtin::Sum
                | Builtin::Avg
                | Builtin::Min
                | Builtin::Max
                | Builtin::Exists
        )
    }
}

/// Normalized value category used for comparability and coercion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum CanonicalType {
    Numeric(NumericKind),
    Text,
    Date,
    DateTime,
    Binary,
    Entity(EntityRef),
    SetOf(Box<CanonicalType>),
    Tuple(Vec<CanonicalType>),
    Null,
    Method,
    Function(Builtin),
}

impl CanonicalType {
    pub const BOOL: CanonicalType = CanonicalType::Numeric(NumericKind::Bool);
    pub const INT: CanonicalType = CanonicalType::Numeric(NumericKind::Int);
    pub const FLOAT: CanonicalType = CanonicalType::Numeric(NumericKind::Float);
    pub const DECIMAL: CanonicalType = CanonicalType::Numeric(NumericKind::Decimal);

    pub fn set_of(item: CanonicalType) -> Self {
        CanonicalType::SetOf(Box::new(item))
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, CanonicalType::Numeric(_))
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, CanonicalType::Numeric(NumericKind::Bool))
    }

    pub fn is_string(&self) -> bool {
        matches!(self, CanonicalType::Text)
    }

    pub fn is_entity(&self) -> bool {
        matches!(self, CanonicalType::Entity(_))
    }

    pub fn is_set(&self) -> bool {
        matches!(self, CanonicalType::SetOf(_))
    }

    pub fn entity(&self) -> Option<&EntityRef> {
        match self {
            CanonicalType::Entity(e) => Some(e),
            _ => None,
        }
    }

    /// Item type of a `SetOf`, or the type itself.
    pub fn item_type(&self) -> &CanonicalType {
        match self {
            CanonicalType::SetOf(item) => item,
            other => other,
        }
    }

    /// Types that support ordering comparisons and MIN/MAX.
    pub fn is_comparable_kind(&self) -> bool {
        matches!(
            self,
            CanonicalType::Numeric(_)
                | CanonicalType::Text
                | CanonicalType::Date
                | CanonicalType::DateTime
                | CanonicalType::Binary
        )
    }

    /// Scalar types a host value can have.
    pub fn is_primitive(&self) -> bool {
        self.is_comparable_kind()
    }
}

impl fmt::Display for CanonicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CanonicalType::Numeric(NumericKind::Bool) => write!(f, "bool"),
            CanonicalType::Numeric(NumericKind::Int) => write!(f, "int"),
            CanonicalType::Numeric(NumericKind::Float) => write!(f, "float"),
            CanonicalType::Numeric(NumericKind::Decimal) => write!(f, "Decimal"),
            CanonicalType::Text => write!(f, "str"),
            CanonicalType::Date => write!(f, "date"),
            CanonicalType::DateTime => write!(f, "datetime"),
            CanonicalType::Binary => write!(f, "bytes"),
            CanonicalType::Entity(e) => write!(f, "{}", e.name),
            CanonicalType::SetOf(item) => write!(f, "Set of {}", item),
            CanonicalType::Tuple(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                if items.len() == 1 {
                    write!(f, ",")?;
                }
                write!(f, ")")
            }
            CanonicalType::Null => write!(f, "NoneType"),
            CanonicalType::Method => write!(f, "method"),
            CanonicalType::Function(b) => write!(f, "{}", b.name()),
        }
    }
}

fn coerce_scalar(t1: &CanonicalType, t2: &CanonicalType) -> Option<CanonicalType> {
    use CanonicalType::*;
    if t1 == t2 {
        return Some(t1.clone());
    }
    match (t1, t2) {
        (Numeric(a), Numeric(b)) => Some(Numeric(*a.max(b))),
        (Date, DateTime) | (DateTime, Date) => Some(DateTime),
        _ => None,
    }
}

/// Result type of combining two operands, if they coerce.
pub fn coerce(t1: &CanonicalType, t2: &CanonicalType) -> Option<CanonicalType> {
    if t1 == t2 {
        return Some(t1.clone());
    }
    let is_set = t1.is_set() || t2.is_set();
    let result = coerce_scalar(t1.item_type(), t2.item_type())?;
    Some(if is_set {
        CanonicalType::set_of(result)
    } else {
        result
    })
}

/// Whether operands of the given types may meet under `op`.
pub fn comparable(op: CmpOp, t1: &CanonicalType, t2: &CanonicalType) -> bool {
    use CanonicalType::*;
    match op {
        CmpOp::In | CmpOp::NotIn => match t2 {
            SetOf(item) => comparable_membership(t1, item),
            _ => false,
        },
        CmpOp::Is | CmpOp::IsNot => *t1 == Null || *t2 == Null,
        CmpOp::Eq | CmpOp::Ne => comparable_eq(t1, t2),
        CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => comparable_order(t1, t2),
    }
}

/// Whether a value of type `item` may be tested for membership among
/// values of type `set_item`, as in `x in (a, b)` or `x in collection`.
pub fn comparable_membership(item: &CanonicalType, set_item: &CanonicalType) -> bool {
    // No bool-to-number promotion under membership.
    if item.is_bool() != set_item.is_bool() && item.is_numeric() && set_item.is_numeric() {
        return false;
    }
    comparable_eq(item, set_item)
}

fn comparable_eq(t1: &CanonicalType, t2: &CanonicalType) -> bool {
    use CanonicalType::*;
    match (t1, t2) {
        (Tuple(a), Tuple(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| comparable_eq(x, y))
        }
        (Tuple(_), _) | (_, Tuple(_)) => false,
        (Null, Null) => false,
        (Null, _) | (_, Null) => true,
        (Entity(a), Entity(b)) => a.schema == b.schema && a.root == b.root,
        (SetOf(a), SetOf(b)) => comparable_eq(a, b),
        (Numeric(NumericKind::Int), Text) | (Text, Numeric(NumericKind::Int)) => true,
        _ if t1.is_primitive() && t2.is_primitive() => {
            t1 == t2 || coerce_scalar(t1, t2).is_some()
        }
        _ => false,
    }
}

fn comparable_order(t1: &CanonicalType, t2: &CanonicalType) -> bool {
    use CanonicalType::*;
    match (t1, t2) {
        (Tuple(a), Tuple(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| comparable_eq(x, y))
        }
        (SetOf(a), SetOf(b)) => comparable_order(a, b),
        _ if t1 == t2 => t1.is_comparable_kind(),
        _ if t1.is_primitive() && t2.is_primitive() => coerce_scalar(t1, t2).is_some(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_types() -> Vec<CanonicalType> {
        let student = CanonicalType::Entity(EntityRef::new(1, "Student", "Student"));
        vec![
            CanonicalType::BOOL,
            CanonicalType::INT,
            CanonicalType::FLOAT,
            CanonicalType::DECIMAL,
            CanonicalType::Text,
            CanonicalType::Date,
            CanonicalType::DateTime,
            CanonicalType::Binary,
            student.clone(),
            CanonicalType::set_of(CanonicalType::INT),
            CanonicalType::set_of(student),
            CanonicalType::Tuple(vec![CanonicalType::INT, CanonicalType::Text]),
            CanonicalType::Null,
        ]
    }

    #[test]
    fn test_comparable_is_symmetric_under_inverse() {
        let ops = [
            CmpOp::Eq,
            CmpOp::Ne,
            CmpOp::Lt,
            CmpOp::Le,
            CmpOp::Gt,
            CmpOp::Ge,
            CmpOp::Is,
            CmpOp::IsNot,
        ];
        for op in ops {
            let inverse = op.inverse().unwrap();
            for t1 in all_types() {
                for t2 in all_types() {
                    assert_eq!(
                        comparable(op, &t1, &t2),
                        comparable(inverse, &t2, &t1),
                        "{:?} {} {}",
                        op,
                        t1,
                        t2
                    );
                }
            }
        }
    }

    #[test]
    fn test_coerce_is_symmetric() {
        for t1 in all_types() {
            for t2 in all_types() {
                assert_eq!(coerce(&t1, &t2), coerce(&t2, &t1), "{} {}", t1, t2);
            }
        }
    }

    #[test]
    fn test_numeric_widening() {
        assert_eq!(
            coerce(&CanonicalType::INT, &CanonicalType::FLOAT),
            Some(CanonicalType::FLOAT)
        );
        assert_eq!(
            coerce(&CanonicalType::BOOL, &CanonicalType::INT),
            Some(CanonicalType::INT)
        );
        assert_eq!(
            coerce(&CanonicalType::FLOAT, &CanonicalType::DECIMAL),
            Some(CanonicalType::DECIMAL)
        );
        assert_eq!(
            coerce(&CanonicalType::Date, &CanonicalType::DateTime),
            Some(CanonicalType::DateTime)
        );
        assert_eq!(coerce(&CanonicalType::Text, &CanonicalType::INT), None);
    }

    #[test]
    fn test_coerce_keeps_set_wrapper() {
        let ints = CanonicalType::set_of(CanonicalType::INT);
        assert_eq!(
            coerce(&ints, &CanonicalType::FLOAT),
            Some(CanonicalType::set_of(CanonicalType::FLOAT))
        );
    }

    #[test]
    fn test_bool_does_not_promote_under_membership() {
        let ints = CanonicalType::set_of(CanonicalType::INT);
        assert!(comparable(CmpOp::In, &CanonicalType::INT, &ints));
        assert!(!comparable(CmpOp::In, &CanonicalType::BOOL, &ints));
        assert!(comparable(CmpOp::Lt, &CanonicalType::BOOL, &CanonicalType::INT));
    }

    #[test]
    fn test_text_and_number_are_not_ordered() {
        assert!(!comparable(CmpOp::Gt, &CanonicalType::Text, &CanonicalType::FLOAT));
        assert!(comparable(CmpOp::Eq, &CanonicalType::Text, &CanonicalType::INT));
    }

    #[test]
    fn test_entities_share_root() {
        let person = CanonicalType::Entity(EntityRef::new(1, "Person", "Person"));
        let student = CanonicalType::Entity(EntityRef::new(1, "Student", "Person"));
        let group = CanonicalType::Entity(EntityRef::new(1, "Group", "Group"));
        let other_schema = CanonicalType::Entity(EntityRef::new(2, "Person", "Person"));
        assert!(comparable(CmpOp::Eq, &person, &student));
        assert!(!comparable(CmpOp::Eq, &person, &group));
        assert!(!comparable(CmpOp::Eq, &person, &other_schema));
        assert!(!comparable(CmpOp::Lt, &person, &student));
    }

    #[test]
    fn test_type_labels() {
        assert_eq!(CanonicalType::Text.to_string(), "str");
        assert_eq!(CanonicalType::FLOAT.to_string(), "float");
        assert_eq!(
            CanonicalType::Tuple(vec![CanonicalType::INT]).to_string(),
            "(int,)"
        );
        assert_eq!(
            CanonicalType::set_of(CanonicalType::Text).to_string(),
            "Set of str"
        );
    }
}
