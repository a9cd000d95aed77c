//! Primitive type lattice used by overload resolution and coercion.

use arrow_schema::DataType;

/// SQL-facing name of a primitive type; conversion functions are
/// registered under these names.
pub fn type_name(dt: &DataType) -> Option<&'static str> {
    Some(match dt {
        DataType::Boolean => "boolean",
        DataType::Int8 => "tinyint",
        DataType::Int16 => "smallint",
        DataType::Int32 => "int",
        DataType::Int64 => "bigint",
        DataType::Float32 => "float",
        DataType::Float64 => "double",
        DataType::Utf8 => "string",
        _ => return None,
    })
}

pub fn is_primitive(dt: &DataType) -> bool {
    type_name(dt).is_some()
}

pub fn is_numeric(dt: &DataType) -> bool {
    numeric_rank(dt).is_some()
}

fn numeric_rank(dt: &DataType) -> Option<u8> {
    Some(match dt {
        DataType::Int8 => 1,
        DataType::Int16 => 2,
        DataType::Int32 => 3,
        DataType::Int64 => 4,
        DataType::Float32 => 5,
        DataType::Float64 => 6,
        _ => return None,
    })
}

/// Wider of two numeric types, by rank.
pub fn wider_numeric(a: &DataType, b: &DataType) -> Option<DataType> {
    let ra = numeric_rank(a)?;
    let rb = numeric_rank(b)?;
    Some(if ra >= rb { a.clone() } else { b.clone() })
}

/// The implicit conversion table: numeric widening along the rank chain,
/// numeric to string, and string to double. `Null` converts to anything.
pub fn implicit_convertible(from: &DataType, to: &DataType) -> bool {
    if from == to || *from == DataType::Null {
        return true;
    }
    if let (Some(rf), Some(rt)) = (numeric_rank(from), numeric_rank(to)) {
        return rf <= rt;
    }
    if is_numeric(from) && *to == DataType::Utf8 {
        return true;
    }
    if *from == DataType::Utf8 && *to == DataType::Float64 {
        return true;
    }
    false
}

/// Common class of two types for key unification: equal types stay, mixed
/// numerics widen, numeric/string pairs unify to string.
pub fn common_class(a: &DataType, b: &DataType) -> Option<DataType> {
    if a == b {
        return Some(a.clone());
    }
    if *a == DataType::Null {
        return Some(b.clone());
    }
    if *b == DataType::Null {
        return Some(a.clone());
    }
    if let Some(w) = wider_numeric(a, b) {
        return Some(w);
    }
    if (*a == DataType::Utf8 && is_numeric(b)) || (*b == DataType::Utf8 && is_numeric(a)) {
        return Some(DataType::Utf8);
    }
    None
}
